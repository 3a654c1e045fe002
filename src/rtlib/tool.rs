use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::Mutex,
};

use tracing::{info, warn};

use crate::{
    file_util,
    result::{trace_ok_warn, ThumbError, ThumbResult},
    ssh::{expand_tilde, Transport},
};

/// Probe order when no cached path exists: bare name on PATH first, then the
/// user-local locations the installer writes to.
pub const TOOL_PROBE_PATHS: [&str; 3] = [
    "ffmpeg",
    "$HOME/bin/ffmpeg",
    "$HOME/bin/ffmpeg-master-latest-win64-gpl-shared/bin/ffmpeg.exe",
];

fn version_ok(output: &str) -> bool {
    let lower = output.to_lowercase();
    !output.trim().is_empty() && !lower.contains("notfound") && !lower.contains("not found")
}

fn check_version<C: Transport>(conn: &mut C, tool_path: &str) -> ThumbResult<bool> {
    let (_, output) = conn.execute_command(&format!("{tool_path} -version || echo 'notfound'"))?;
    Ok(version_ok(&output))
}

#[derive(Debug)]
struct PlatformInstall {
    url: &'static str,
    install_path: &'static str,
    script: String,
}

/// OS×architecture table from which the static build is fetched. Everything
/// runs remotely through POSIX shell, so the local platform is irrelevant.
fn select_platform(os: &str, arch: &str) -> ThumbResult<PlatformInstall> {
    let tar_script = |url: &str| {
        format!(
            "URL=\"{url}\"; mkdir -p ~/bin && cd /tmp && wget -O ffmpeg.tar.xz \"$URL\" \
             && tar -xf ffmpeg.tar.xz && cp ffmpeg-*-static/ffmpeg ~/bin/ && chmod +x ~/bin/ffmpeg"
        )
    };
    let zip_script = |url: &str| {
        format!(
            "URL=\"{url}\"; mkdir -p ~/bin && cd /tmp && wget -O ffmpeg.zip \"$URL\" \
             && unzip -o ffmpeg.zip && mv ffmpeg ~/bin/ && chmod +x ~/bin/ffmpeg"
        )
    };
    let os_lower = os.to_lowercase();
    let windowsish = os.contains("MINGW")
        || os.contains("MSYS")
        || os.contains("CYGWIN")
        || os_lower.contains("windows");
    if os == "Linux" && arch == "x86_64" {
        let url = "https://johnvansickle.com/ffmpeg/releases/ffmpeg-release-amd64-static.tar.xz";
        Ok(PlatformInstall {
            url,
            install_path: "~/bin/ffmpeg",
            script: tar_script(url),
        })
    } else if os == "Linux" && (arch == "armv6l" || arch == "armv7l") {
        let url = "https://johnvansickle.com/ffmpeg/releases/ffmpeg-release-armhf-static.tar.xz";
        Ok(PlatformInstall {
            url,
            install_path: "~/bin/ffmpeg",
            script: tar_script(url),
        })
    } else if os == "Darwin" && arch == "arm64" {
        let url = "https://www.osxexperts.net/ffmpeg6arm.zip";
        Ok(PlatformInstall {
            url,
            install_path: "~/bin/ffmpeg",
            script: zip_script(url),
        })
    } else if os == "Darwin" && arch == "x86_64" {
        let url = "https://evermeet.cx/ffmpeg/getrelease/zip";
        Ok(PlatformInstall {
            url,
            install_path: "~/bin/ffmpeg",
            script: zip_script(url),
        })
    } else if windowsish {
        let url = "https://github.com/BtbN/FFmpeg-Builds/releases/download/latest/ffmpeg-master-latest-win64-gpl-shared.zip";
        Ok(PlatformInstall {
            url,
            install_path: "~/bin/ffmpeg-master-latest-win64-gpl-shared/bin/ffmpeg.exe",
            script: format!(
                "URL=\"{url}\"; mkdir -p ~/bin; cd ~/bin; wget -O ffmpeg.zip \"$URL\"; \
                 powershell -Command \"Expand-Archive -Path ffmpeg.zip -DestinationPath .\";"
            ),
        })
    } else {
        Err(ThumbError::UnsupportedPlatform(format!("{os}/{arch}")))
    }
}

/// Per-server resolved tool paths, persisted as JSON across sessions and
/// verified at most once per process per server.
pub struct ToolPaths {
    paths: Mutex<HashMap<String, String>>,
    verified: Mutex<HashSet<String>>,
    store_path: Option<PathBuf>,
}

impl ToolPaths {
    pub fn new(store_path: Option<PathBuf>) -> Self {
        let paths = store_path
            .as_deref()
            .filter(|p| p.exists())
            .and_then(|p| trace_ok_warn(file_util::read_to_string(p)))
            .and_then(|s| trace_ok_warn(serde_json::from_str::<HashMap<String, String>>(&s)))
            .unwrap_or_default();
        Self {
            paths: Mutex::new(paths),
            verified: Mutex::new(HashSet::new()),
            store_path,
        }
    }

    pub fn get(&self, server_key: &str) -> Option<String> {
        self.paths.lock().unwrap().get(server_key).cloned()
    }

    fn is_verified(&self, server_key: &str) -> bool {
        self.verified.lock().unwrap().contains(server_key)
    }

    fn mark_verified(&self, server_key: &str) {
        self.verified.lock().unwrap().insert(server_key.to_string());
    }

    fn put(&self, server_key: &str, tool_path: &str) {
        self.paths
            .lock()
            .unwrap()
            .insert(server_key.to_string(), tool_path.to_string());
        self.mark_verified(server_key);
        self.persist();
    }

    pub fn invalidate(&self, server_key: &str) {
        self.paths.lock().unwrap().remove(server_key);
        self.verified.lock().unwrap().remove(server_key);
        self.persist();
    }

    fn persist(&self) {
        if let Some(store_path) = &self.store_path {
            if let Some(parent) = store_path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let serialized = {
                let paths = self.paths.lock().unwrap();
                trace_ok_warn(serde_json::to_string(&*paths))
            };
            serialized.map(|s| trace_ok_warn(file_util::write(store_path, s)));
        }
    }
}

fn detect_platform<C: Transport>(conn: &mut C) -> ThumbResult<(String, String)> {
    let (_, os) = conn.execute_command("uname -s")?;
    let (_, arch) = conn.execute_command("uname -m")?;
    Ok((os.trim().to_string(), arch.trim().to_string()))
}

fn install<C: Transport>(conn: &mut C) -> ThumbResult<String> {
    let (os, arch) = detect_platform(conn)?;
    info!("detected remote platform {os}/{arch}");
    let platform = select_platform(&os, &arch)?;
    info!("installing tool from {}", platform.url);
    let (status, output) = conn.execute_command(&platform.script)?;
    if status != 0 {
        return Err(ThumbError::ToolUnavailable(format!(
            "install script exited with {status}: {output}"
        )));
    }
    let installed = expand_tilde(platform.install_path);
    if !check_version(conn, &installed)? {
        return Err(ThumbError::ToolUnavailable(format!(
            "verification of {installed} failed after install"
        )));
    }
    Ok(installed)
}

/// Resolves a working FFmpeg path on the remote host, installing it when
/// neither the cached path nor any known location responds to a version
/// check. The connection must already be live.
pub fn ensure_tool_available<C: Transport>(
    server_key: &str,
    tool_paths: &ToolPaths,
    conn: &mut C,
) -> ThumbResult<String> {
    if let Some(cached) = tool_paths.get(server_key) {
        if tool_paths.is_verified(server_key) {
            return Ok(cached);
        }
        if check_version(conn, &cached)? {
            tool_paths.mark_verified(server_key);
            return Ok(cached);
        }
        warn!("cached tool path {cached} for {server_key} no longer works, re-detecting");
        tool_paths.invalidate(server_key);
    }
    for probe in TOOL_PROBE_PATHS {
        if check_version(conn, probe)? {
            info!("tool found at {probe} on {server_key}");
            tool_paths.put(server_key, probe);
            return Ok(probe.to_string());
        }
    }
    let installed = install(conn)?;
    info!("tool installed at {installed} on {server_key}");
    tool_paths.put(server_key, &installed);
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{exec_log, ScriptedTransport};
    use crate::{defer_file_removal, tracing_setup::init_tracing_for_tests};

    #[test]
    fn test_version_ok() {
        assert!(version_ok("ffmpeg version 6.0-static"));
        assert!(!version_ok("notfound"));
        assert!(!version_ok("sh: ffmpeg: command Not Found"));
        assert!(!version_ok("   "));
    }

    #[test]
    fn test_select_platform() {
        assert!(select_platform("Linux", "x86_64")
            .unwrap()
            .url
            .ends_with("amd64-static.tar.xz"));
        assert!(select_platform("Linux", "armv7l")
            .unwrap()
            .url
            .ends_with("armhf-static.tar.xz"));
        assert_eq!(
            select_platform("Darwin", "arm64").unwrap().install_path,
            "~/bin/ffmpeg"
        );
        assert!(select_platform("MINGW64_NT-10.0", "x86_64")
            .unwrap()
            .install_path
            .ends_with("ffmpeg.exe"));
        assert_eq!(
            select_platform("Linux", "mips").unwrap_err(),
            ThumbError::UnsupportedPlatform("Linux/mips".to_string())
        );
    }

    #[test]
    fn test_auto_install_and_reuse() {
        init_tracing_for_tests();
        let tool_paths = ToolPaths::new(None);
        let mut conn = ScriptedTransport::new(vec![
            ("ffmpeg -version", 0, "notfound"),
            ("$HOME/bin/ffmpeg -version", 0, "notfound"),
            ("ffmpeg.exe -version", 0, "notfound"),
            ("uname -s", 0, "Linux\n"),
            ("uname -m", 0, "x86_64\n"),
            ("wget", 0, ""),
            ("$HOME/bin/ffmpeg -version", 0, "ffmpeg version 6.0\n"),
        ]);
        conn.connect().unwrap();
        let resolved = ensure_tool_available("srv", &tool_paths, &mut conn).unwrap();
        assert_eq!(resolved, "$HOME/bin/ffmpeg");
        let n_probes_first = exec_log(&conn)
            .iter()
            .filter(|c| c.contains("-version"))
            .count();
        assert_eq!(n_probes_first, 4);

        // second call hits the in-process cache, no detection probes rerun
        let mut conn2 = ScriptedTransport::new(vec![]);
        conn2.connect().unwrap();
        let resolved2 = ensure_tool_available("srv", &tool_paths, &mut conn2).unwrap();
        assert_eq!(resolved2, "$HOME/bin/ffmpeg");
        assert!(exec_log(&conn2).is_empty());
    }

    #[test]
    fn test_cached_path_invalidated_when_broken() {
        init_tracing_for_tests();
        let tool_paths = ToolPaths::new(None);
        tool_paths.paths.lock().unwrap().insert(
            "srv".to_string(),
            "/opt/oldffmpeg/ffmpeg".to_string(),
        );
        let mut conn = ScriptedTransport::new(vec![
            ("/opt/oldffmpeg/ffmpeg -version", 0, "sh: not found\nnotfound"),
            ("ffmpeg -version", 0, "ffmpeg version 6.0\n"),
        ]);
        conn.connect().unwrap();
        let resolved = ensure_tool_available("srv", &tool_paths, &mut conn).unwrap();
        assert_eq!(resolved, "ffmpeg");
        assert_eq!(tool_paths.get("srv").as_deref(), Some("ffmpeg"));
    }

    #[test]
    fn test_unsupported_platform_propagates() {
        let tool_paths = ToolPaths::new(None);
        let mut conn = ScriptedTransport::new(vec![
            ("uname -s", 0, "SunOS\n"),
            ("uname -m", 0, "sparc64\n"),
        ]);
        conn.connect().unwrap();
        // every version probe answers notfound by scripting nothing for them
        let res = ensure_tool_available("srv", &tool_paths, &mut conn);
        assert_eq!(
            res.unwrap_err(),
            ThumbError::UnsupportedPlatform("SunOS/sparc64".to_string())
        );
    }

    #[test]
    fn test_store_roundtrip() {
        init_tracing_for_tests();
        let store = file_util::DEFAULT_TMPDIR.join("tool_paths_test.json");
        std::fs::create_dir_all(file_util::DEFAULT_TMPDIR.as_path()).unwrap();
        defer_file_removal!(&store);
        {
            let tool_paths = ToolPaths::new(Some(store.clone()));
            tool_paths.put("srv", "$HOME/bin/ffmpeg");
        }
        let reloaded = ToolPaths::new(Some(store.clone()));
        assert_eq!(reloaded.get("srv").as_deref(), Some("$HOME/bin/ffmpeg"));
        // a reloaded path still needs one per-process verification
        assert!(!reloaded.is_verified("srv"));
        reloaded.invalidate("srv");
        assert_eq!(reloaded.get("srv"), None);
        let reloaded2 = ToolPaths::new(Some(store.clone()));
        assert_eq!(reloaded2.get("srv"), None);
    }
}
