use crate::{
    file_util::{self, DEFAULT_HOMEDIR},
    result::{ThumbError, ThumbResult},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How the SSH session authenticates. The secret is treated as an opaque
/// string resolved by the caller; nothing here persists it.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SshCredential {
    Password(String),
    KeyFile(String),
}

fn default_port() -> u16 {
    22
}
fn default_thumb_max() -> usize {
    2
}
fn default_command_timeout_ms() -> u32 {
    30_000
}

/// Describes one remote host. Supplied by the caller per request; the
/// identity key is used for connection pooling and tool-path caching, so it
/// must stay consistent across calls.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerCfg {
    pub name: Option<String>,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    /// Upper bound on concurrently granted thumbnail slots for this server.
    #[serde(default = "default_thumb_max")]
    pub thumb_max: usize,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u32,
    // kept last so the toml serializer emits the table after plain values
    pub credential: SshCredential,
}

impl ServerCfg {
    /// Identity key, name-or-hostname. Guaranteed non-empty as long as the
    /// host is non-empty.
    pub fn identity(&self) -> &str {
        match &self.name {
            Some(n) if !n.is_empty() => n,
            _ => &self.host,
        }
    }
}

pub fn get_default_cachedir() -> PathBuf {
    DEFAULT_HOMEDIR.join("cache")
}

pub fn get_tool_store_path() -> PathBuf {
    DEFAULT_HOMEDIR.join("tool_paths.json")
}

pub fn read_server_cfg(path: &Path) -> ThumbResult<ServerCfg> {
    let s = file_util::read_to_string(path)?;
    toml::from_str(&s).map_err(|e| ThumbError::Io(format!("could not parse {path:?}, {e}")))
}

pub fn write_server_cfg(path: &Path, cfg: &ServerCfg) -> ThumbResult<()> {
    let s = toml::to_string_pretty(cfg)
        .map_err(|e| ThumbError::Io(format!("could not serialize server cfg, {e}")))?;
    file_util::write(path, s)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CFG: &str = r#"
        name = "seedbox"
        host = "10.0.0.4"
        user = "media"
        thumb_max = 3
        [credential]
        password = "hunter2"
        "#;

    #[test]
    fn test_parse_defaults() {
        let cfg: ServerCfg = toml::from_str(CFG).unwrap();
        assert_eq!(cfg.identity(), "seedbox");
        assert_eq!(cfg.port, 22);
        assert_eq!(cfg.thumb_max, 3);
        assert_eq!(cfg.command_timeout_ms, 30_000);
        assert_eq!(cfg.credential, SshCredential::Password("hunter2".to_string()));
    }

    #[test]
    fn test_identity_falls_back_to_host() {
        let mut cfg: ServerCfg = toml::from_str(CFG).unwrap();
        cfg.name = Some(String::new());
        assert_eq!(cfg.identity(), "10.0.0.4");
        cfg.name = None;
        assert_eq!(cfg.identity(), "10.0.0.4");
    }

    #[test]
    fn test_roundtrip() {
        let cfg: ServerCfg = toml::from_str(CFG).unwrap();
        let s = toml::to_string_pretty(&cfg).unwrap();
        let reparsed: ServerCfg = toml::from_str(&s).unwrap();
        assert_eq!(cfg, reparsed);
    }
}
