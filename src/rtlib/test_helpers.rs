use std::{
    fs,
    path::Path,
    sync::{Arc, Mutex},
};

use crate::{
    cfg::{ServerCfg, SshCredential},
    result::{ThumbError, ThumbResult},
    ssh::{ConnectionFactory, Transport},
};

pub fn test_server(name: &str, thumb_max: usize) -> ServerCfg {
    ServerCfg {
        name: Some(name.to_string()),
        host: "192.0.2.1".to_string(),
        port: 22,
        user: "u".to_string(),
        thumb_max,
        command_timeout_ms: 30_000,
        credential: SshCredential::Password("pw".to_string()),
    }
}

struct ScriptEntry {
    needle: String,
    status: i32,
    output: String,
    consumed: bool,
}

#[derive(Default)]
struct Shared {
    script: Vec<ScriptEntry>,
    exec_log: Vec<String>,
    downloads: Vec<(String, Vec<u8>)>,
    n_connects: usize,
    n_disconnects: usize,
    fail_connect: bool,
}

/// Transport fake driven by an ordered script. Each executed command consumes
/// the first unconsumed entry whose needle it contains; unmatched commands
/// answer `(0, "")`.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    shared: Arc<Mutex<Shared>>,
    connected: bool,
}

impl ScriptedTransport {
    pub fn new(script: Vec<(&str, i32, &str)>) -> Self {
        let script = script
            .into_iter()
            .map(|(needle, status, output)| ScriptEntry {
                needle: needle.to_string(),
                status,
                output: output.to_string(),
                consumed: false,
            })
            .collect();
        Self {
            shared: Arc::new(Mutex::new(Shared {
                script,
                ..Default::default()
            })),
            connected: false,
        }
    }

    pub fn failing_to_connect() -> Self {
        let t = Self::new(vec![]);
        t.shared.lock().unwrap().fail_connect = true;
        t
    }

    /// Registers bytes served for any remote path containing `path_needle`.
    pub fn serve_download(&self, path_needle: &str, bytes: Vec<u8>) {
        self.shared
            .lock()
            .unwrap()
            .downloads
            .push((path_needle.to_string(), bytes));
    }
}

pub fn exec_log(t: &ScriptedTransport) -> Vec<String> {
    t.shared.lock().unwrap().exec_log.clone()
}

pub fn n_connects(t: &ScriptedTransport) -> usize {
    t.shared.lock().unwrap().n_connects
}

pub fn n_disconnects(t: &ScriptedTransport) -> usize {
    t.shared.lock().unwrap().n_disconnects
}

impl Transport for ScriptedTransport {
    fn connect(&mut self) -> ThumbResult<()> {
        let mut shared = self.shared.lock().unwrap();
        if shared.fail_connect {
            return Err(ThumbError::Connectivity("scripted refusal".to_string()));
        }
        shared.n_connects += 1;
        self.connected = true;
        Ok(())
    }

    fn execute_command(&mut self, cmd: &str) -> ThumbResult<(i32, String)> {
        if !self.connected {
            return Err(ThumbError::NotConnected);
        }
        let mut shared = self.shared.lock().unwrap();
        shared.exec_log.push(cmd.to_string());
        for entry in shared.script.iter_mut() {
            if !entry.consumed && cmd.contains(&entry.needle) {
                entry.consumed = true;
                return Ok((entry.status, entry.output.clone()));
            }
        }
        Ok((0, String::new()))
    }

    fn download_file(
        &mut self,
        remote_path: &str,
        local_dst: &Path,
        on_progress: &mut dyn FnMut(u64),
    ) -> ThumbResult<()> {
        if !self.connected {
            return Err(ThumbError::NotConnected);
        }
        let shared = self.shared.lock().unwrap();
        let bytes = shared
            .downloads
            .iter()
            .find(|(needle, _)| remote_path.contains(needle))
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| ThumbError::RemoteFileNotFound(remote_path.to_string()))?;
        fs::write(local_dst, &bytes).map_err(|e| ThumbError::Io(format!("{e:?}")))?;
        on_progress(bytes.len() as u64);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.shared.lock().unwrap().n_disconnects += 1;
        self.connected = false;
    }
}

/// Factory handing out clones of one scripted transport so tests can inspect
/// the shared log after the engine is done with the connection.
pub struct ScriptedFactory {
    pub transport: ScriptedTransport,
}

impl ScriptedFactory {
    pub fn new(transport: ScriptedTransport) -> Self {
        Self { transport }
    }
}

impl ConnectionFactory for ScriptedFactory {
    type Conn = ScriptedTransport;
    fn open(&self, _: &ServerCfg) -> ScriptedTransport {
        self.transport.clone()
    }
}
