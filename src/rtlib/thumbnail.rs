use std::{
    collections::HashSet,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use image::DynamicImage;
use tracing::{debug, info, warn};

use crate::{
    admission::{AdmissionController, AdmissionStatus},
    cache::{ThumbCache, ThumbCacheCfg},
    cfg::ServerCfg,
    defer_file_removal, file_util, generr,
    image_util::{is_blank_image, placeholder, process_thumbnail, read_image, FileType},
    result::{ThumbError, ThumbResult},
    ssh::{shell_quote, with_connection, ConnectionFactory, Transport},
    tool::{ensure_tool_available, ToolPaths},
    visibility::VisibilitySet,
};

/// Seek offsets tried in order for video sources. Two minutes in skips
/// leaders, the later offsets rescue clips shorter than that.
pub const SEEK_TIMESTAMPS: [&str; 3] = ["00:02:00.000", "00:00:10.000", "00:00:00.000"];

const REMOTE_THUMB_DIR: &str = "thumbs";

fn build_frame_cmd(tool: &str, remote_path: &str, remote_tmp: &str, seek: Option<&str>) -> String {
    let src = shell_quote(remote_path);
    match seek {
        Some(ts) => format!(
            "{tool} -ss {ts} -i {src} -vframes 1 -vf scale=1920:-1 $HOME/{remote_tmp} 2>/dev/null || echo $?"
        ),
        None => format!(
            "{tool} -i {src} -vf scale=1920:-1 $HOME/{remote_tmp} 2>/dev/null || echo $?"
        ),
    }
}

struct InProgress {
    paths: Mutex<HashSet<String>>,
}

struct InProgressGuard<'a> {
    set: &'a InProgress,
    path: String,
}

impl<'a> InProgressGuard<'a> {
    fn try_acquire(set: &'a InProgress, path: &str) -> Option<Self> {
        if set.paths.lock().unwrap().insert(path.to_string()) {
            Some(Self {
                set,
                path: path.to_string(),
            })
        } else {
            None
        }
    }
}

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.set.paths.lock().unwrap().remove(&self.path);
    }
}

/// Extracts one full-resolution frame on the remote host and downloads it,
/// walking the seek offsets until a non-blank frame decodes.
fn generate_remote<C>(
    conn: &mut C,
    tool: &str,
    remote_path: &str,
    file_type: FileType,
) -> ThumbResult<DynamicImage>
where
    C: Transport,
{
    let (_, out) = conn.execute_command(&format!("mkdir -p $HOME/{REMOTE_THUMB_DIR}"))?;
    if !out.trim().is_empty() {
        debug!("creating remote thumb dir said {out:?}");
    }
    // the shell side spells out $HOME while scp resolves the same path
    // relative to the home directory
    let remote_tmp = format!("{REMOTE_THUMB_DIR}/thumb_{}.jpg", uuid::Uuid::new_v4());
    let seeks: &[Option<&str>] = if file_type == FileType::Video {
        &[
            Some(SEEK_TIMESTAMPS[0]),
            Some(SEEK_TIMESTAMPS[1]),
            Some(SEEK_TIMESTAMPS[2]),
        ]
    } else {
        &[None]
    };
    for seek in seeks {
        let cmd = build_frame_cmd(tool, remote_path, &remote_tmp, *seek);
        let (_, out) = conn.execute_command(&cmd)?;
        let (_, check) = conn.execute_command(&format!(
            "[ -f $HOME/{remote_tmp} ] && echo 'success' || echo 'failed'"
        ))?;
        if check.trim() != "success" {
            debug!("no frame at seek {seek:?} for {remote_path}, tool said {out:?}");
            continue;
        }
        let local_tmp = file_util::tmp_download_path()?;
        defer_file_removal!(&local_tmp);
        let download_res = conn.download_file(&remote_tmp, &local_tmp, &mut |n_bytes| {
            debug!("downloaded {n_bytes} bytes of {remote_tmp}");
        });
        let (_, _) = conn.execute_command(&format!("rm -f $HOME/{remote_tmp}"))?;
        if let Err(e) = download_res {
            warn!("download of frame for {remote_path} failed, {e:?}");
            continue;
        }
        let frame = match read_image(&local_tmp) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("decoding frame for {remote_path} failed, {e:?}");
                continue;
            }
        };
        if is_blank_image(&frame) {
            debug!("blank frame at seek {seek:?} for {remote_path}");
            continue;
        }
        return Ok(frame);
    }
    Err(generr!("no usable frame extracted from {}", remote_path))
}

/// Front door of the subsystem. Owns the caches, the visibility set, and the
/// admission controller; one instance serves all servers.
pub struct ThumbnailEngine<F>
where
    F: ConnectionFactory,
{
    factory: F,
    visibility: Arc<VisibilitySet>,
    admission: AdmissionController,
    cache: ThumbCache,
    tool_paths: ToolPaths,
    in_progress: InProgress,
}

impl<F> ThumbnailEngine<F>
where
    F: ConnectionFactory,
{
    pub fn new(factory: F, cache_cfg: ThumbCacheCfg, tool_store_path: Option<PathBuf>) -> Self {
        let visibility = Arc::new(VisibilitySet::default());
        Self {
            factory,
            admission: AdmissionController::new(Arc::clone(&visibility)),
            visibility,
            cache: ThumbCache::new(cache_cfg),
            tool_paths: ToolPaths::new(tool_store_path),
            in_progress: InProgress {
                paths: Mutex::new(HashSet::new()),
            },
        }
    }

    pub fn visibility(&self) -> &VisibilitySet {
        &self.visibility
    }

    /// Cooperative cancellation for a path that left the viewport.
    pub fn remove_thumbnail_from_queue(&self, remote_path: &str) {
        self.admission.remove_thumbnail_from_queue(remote_path);
    }

    /// Marks the path invisible and drops it from the queue in one step.
    pub fn cancel_thumbnail(&self, remote_path: &str) {
        self.visibility.mark_invisible(remote_path);
        self.admission.remove_thumbnail_from_queue(remote_path);
    }

    pub fn get_status(&self) -> AdmissionStatus {
        self.admission.get_status()
    }

    /// Cancels all queued work and forgets viewport state, e.g. on a server
    /// switch in the caller.
    pub fn reset(&self) {
        self.admission.clear_all();
        self.visibility.clear();
    }

    pub fn clear_cache(&self) -> ThumbResult<()> {
        self.cache.clear()
    }

    pub fn cache_size_in_mb(&self) -> f64 {
        self.cache.size_in_mb()
    }

    /// Returns the processed square thumbnail for `remote_path`, generating
    /// and caching it if needed. Non-media paths and failed generations
    /// degrade to placeholders; only cancellation surfaces as an error.
    pub fn get_thumbnail(
        &self,
        server: &ServerCfg,
        remote_path: &str,
    ) -> ThumbResult<DynamicImage> {
        let file_type = FileType::determine(remote_path);
        if !file_type.is_media() {
            return Ok(placeholder(file_type));
        }
        if !self.visibility.is_visible(remote_path) {
            return Err(ThumbError::Cancelled);
        }
        if let Some(cached) = self.cache.lookup(remote_path) {
            debug!("cache hit for {remote_path}");
            return Ok(process_thumbnail(&cached, file_type));
        }
        let Some(_in_progress) = InProgressGuard::try_acquire(&self.in_progress, remote_path)
        else {
            // another task already generates this path and will fill the cache
            debug!("{remote_path} already in progress");
            return Ok(placeholder(file_type));
        };
        let server_key = server.identity().to_string();
        let Some(_slot) = self
            .admission
            .admit(remote_path, &server_key, server.thumb_max)
        else {
            return Err(ThumbError::Cancelled);
        };
        // the wait for the slot may have outlived the viewport position
        if !self.visibility.is_visible(remote_path) {
            return Err(ThumbError::Cancelled);
        }
        let frame_res = with_connection(&self.factory, server, |conn| {
            conn.connect()?;
            let tool = ensure_tool_available(&server_key, &self.tool_paths, conn)?;
            generate_remote(conn, &tool, remote_path, file_type)
        });
        match frame_res {
            Ok(frame) => {
                info!("generated thumbnail for {remote_path}");
                if let Err(e) = self.cache.store(remote_path, &frame) {
                    warn!("could not persist thumbnail for {remote_path}, {e:?}");
                }
                Ok(process_thumbnail(&frame, file_type))
            }
            Err(ThumbError::Cancelled) => Err(ThumbError::Cancelled),
            Err(e) => {
                warn!("thumbnail generation for {remote_path} failed, {e:?}");
                Ok(placeholder(file_type))
            }
        }
    }
}
