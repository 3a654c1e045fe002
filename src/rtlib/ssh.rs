use std::{
    fmt::Debug,
    fs,
    io::{Read, Write},
    net::TcpStream,
    path::Path,
};

use ssh2::{Channel, Session};
use tracing::{debug, info, warn};

use crate::{
    cfg::{ServerCfg, SshCredential},
    connerr,
    file_util::checked_remove,
    result::{ThumbError, ThumbResult},
};

const DOWNLOAD_CHUNK_SIZE: usize = 32 * 1024;

/// Seam between the generation pipeline and the wire. Production code uses
/// [`SshConnection`]; tests script this trait instead of talking to a host.
pub trait Transport {
    /// Establishes the session. Idempotent when already connected.
    fn connect(&mut self) -> ThumbResult<()>;
    /// Runs a shell command, returns `(exit_status, merged_output)`.
    fn execute_command(&mut self, cmd: &str) -> ThumbResult<(i32, String)>;
    /// Streams a remote file into `local_dst`, reporting non-decreasing byte
    /// counts. A failed transfer removes the partial local file.
    fn download_file(
        &mut self,
        remote_path: &str,
        local_dst: &Path,
        on_progress: &mut dyn FnMut(u64),
    ) -> ThumbResult<()>;
    /// Always safe to call, repeatedly or before connect. Never errors.
    fn disconnect(&mut self);
}

/// Builds fresh transports for the scoped-connection idiom.
pub trait ConnectionFactory {
    type Conn: Transport;
    fn open(&self, server: &ServerCfg) -> Self::Conn;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connected,
    Failed,
}

/// One SSH session bound to exactly one server. Not assumed safe for
/// concurrent simultaneous commands; the admission controller guarantees one
/// logical task per connection on the thumbnail path.
pub struct SshConnection {
    server: ServerCfg,
    sess: Option<Session>,
    state: ConnState,
}

fn to_cmd_err<E>(cmd: &str, e: E) -> ThumbError
where
    E: Debug,
{
    let msg = format!("{e:?}");
    if msg.to_lowercase().contains("timeout") {
        ThumbError::Timeout(format!("command {cmd}"))
    } else {
        connerr!("could not run {} due to {}", cmd, msg)
    }
}

fn close_channel(mut channel: Channel) -> ThumbResult<i32> {
    channel.send_eof().map_err(|e| to_cmd_err("eof", e))?;
    channel.wait_eof().map_err(|e| to_cmd_err("wait eof", e))?;
    channel.close().map_err(|e| to_cmd_err("close", e))?;
    channel.wait_close().map_err(|e| to_cmd_err("wait close", e))?;
    channel.exit_status().map_err(|e| to_cmd_err("exit status", e))
}

/// Streams up to `n_total` bytes from `src` into a freshly created
/// `local_dst`, reporting non-decreasing running byte counts. On any error
/// the partial local file is removed before the error propagates.
fn copy_to_local(
    src: &mut dyn Read,
    n_total: u64,
    local_dst: &Path,
    on_progress: &mut dyn FnMut(u64),
) -> ThumbResult<u64> {
    let mut copy = |src: &mut dyn Read| -> ThumbResult<u64> {
        let mut local_file = fs::File::create(local_dst)
            .map_err(|e| ThumbError::Io(format!("could not create {local_dst:?}, {e:?}")))?;
        let mut buf = [0u8; DOWNLOAD_CHUNK_SIZE];
        let mut n_read_total = 0u64;
        while n_read_total < n_total {
            let n_read = src.read(&mut buf).map_err(|e| to_cmd_err("download", e))?;
            if n_read == 0 {
                break;
            }
            local_file
                .write_all(&buf[..n_read])
                .map_err(|e| ThumbError::Io(format!("write to {local_dst:?} failed, {e:?}")))?;
            n_read_total += n_read as u64;
            on_progress(n_read_total);
        }
        Ok(n_read_total)
    };
    match copy(src) {
        Ok(n_read_total) => Ok(n_read_total),
        Err(e) => {
            // do not leave a truncated file behind
            if local_dst.exists() {
                checked_remove(&local_dst, |p| fs::remove_file(p));
            }
            Err(e)
        }
    }
}

impl SshConnection {
    pub fn new(server: ServerCfg) -> Self {
        Self {
            server,
            sess: None,
            state: ConnState::Disconnected,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    fn session(&self) -> ThumbResult<&Session> {
        self.sess.as_ref().ok_or(ThumbError::NotConnected)
    }

    fn auth(server: &ServerCfg) -> ThumbResult<Session> {
        let addr = format!("{}:{}", server.host, server.port);
        let tcp = TcpStream::connect(&addr)
            .map_err(|e| connerr!("TCP stream connection error to {}, {:?}", addr, e))?;
        let mut sess =
            Session::new().map_err(|e| connerr!("could not create ssh session, {:?}", e))?;
        sess.set_tcp_stream(tcp);
        sess.set_timeout(server.command_timeout_ms);
        sess.handshake()
            .map_err(|e| connerr!("ssh handshake error, {:?}", e))?;
        match &server.credential {
            SshCredential::Password(password) => {
                sess.userauth_password(&server.user, password)
                    .map_err(|e| connerr!("ssh user auth error, {:?}", e))?;
            }
            SshCredential::KeyFile(keyfile_path) => {
                let keyfile = Path::new(keyfile_path);
                if !keyfile.exists() {
                    return Err(connerr!("could not find private key file {keyfile:?}"));
                }
                sess.userauth_pubkey_file(&server.user, None, keyfile, None)
                    .map_err(|e| connerr!("ssh user auth error, {:?}", e))?;
            }
        }
        if !sess.authenticated() {
            return Err(connerr!("ssh session not authenticated after userauth"));
        }
        info!("ssh session to {} authenticated", server.identity());
        Ok(sess)
    }
}

impl Transport for SshConnection {
    fn connect(&mut self) -> ThumbResult<()> {
        if self.state == ConnState::Connected {
            return Ok(());
        }
        match Self::auth(&self.server) {
            Ok(sess) => {
                self.sess = Some(sess);
                self.state = ConnState::Connected;
                Ok(())
            }
            Err(e) => {
                self.state = ConnState::Failed;
                Err(e)
            }
        }
    }

    fn execute_command(&mut self, cmd: &str) -> ThumbResult<(i32, String)> {
        let sess = self.session()?;
        let mut channel = sess.channel_session().map_err(|e| to_cmd_err(cmd, e))?;
        channel.exec(cmd).map_err(|e| to_cmd_err(cmd, e))?;
        let mut output = String::new();
        channel
            .read_to_string(&mut output)
            .map_err(|e| to_cmd_err(cmd, e))?;
        // commands like `x 2>/dev/null || echo $?` merge what we need into
        // stdout, stderr is appended for everything else
        let mut stderr = String::new();
        if channel.stderr().read_to_string(&mut stderr).is_ok() && !stderr.is_empty() {
            output.push_str(&stderr);
        }
        let status = close_channel(channel)?;
        debug!("remote command {cmd:?} exited with {status}");
        Ok((status, output))
    }

    fn download_file(
        &mut self,
        remote_path: &str,
        local_dst: &Path,
        on_progress: &mut dyn FnMut(u64),
    ) -> ThumbResult<()> {
        let sess = self.session()?;
        let (mut remote_file, stat) = sess
            .scp_recv(Path::new(remote_path))
            .map_err(|_| ThumbError::RemoteFileNotFound(remote_path.to_string()))?;
        let n_total = stat.size();
        let n_bytes = copy_to_local(&mut remote_file, n_total, local_dst, on_progress)?;
        if let Err(e) = close_channel(remote_file) {
            warn!("closing download channel for {remote_path} failed, {e:?}");
        }
        debug!("downloaded {n_bytes} bytes from {remote_path}");
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(sess) = self.sess.take() {
            if let Err(e) = sess.disconnect(None, "closing", None) {
                debug!("ssh disconnect returned {e:?}");
            }
        }
        self.state = ConnState::Disconnected;
    }
}

impl Drop for SshConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

pub struct SshFactory;
impl ConnectionFactory for SshFactory {
    type Conn = SshConnection;
    fn open(&self, server: &ServerCfg) -> SshConnection {
        SshConnection::new(server.clone())
    }
}

struct ConnGuard<C: Transport>(C);
impl<C: Transport> Drop for ConnGuard<C> {
    fn drop(&mut self) {
        self.0.disconnect();
    }
}

/// Create-use-destroy wrapper. Builds a fresh transport, runs `body` (which
/// must call `connect()` first), and disconnects on every exit path before
/// returning or propagating, including unwinding.
pub fn with_connection<F, B, T>(factory: &F, server: &ServerCfg, body: B) -> ThumbResult<T>
where
    F: ConnectionFactory,
    B: FnOnce(&mut F::Conn) -> ThumbResult<T>,
{
    let mut guard = ConnGuard(factory.open(server));
    body(&mut guard.0)
}

/// Single-quotes a string for embedding in a remote shell command.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Installer output reports `~/...` paths; subsequent non-login shells need
/// `$HOME` instead.
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        format!("$HOME{rest}")
    } else {
        path.to_string()
    }
}
