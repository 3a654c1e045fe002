mod admission;
mod cache;
pub mod cfg;
pub mod file_util;
mod image_util;
pub mod result;
pub mod ssh;
#[cfg(test)]
mod test_helpers;
mod thumbnail;
mod tool;
pub mod tracing_setup;
mod visibility;

pub use admission::{AdmissionController, AdmissionGuard, AdmissionStatus};
pub use cache::{cache_file_name, ThumbCache, ThumbCacheCfg};
pub use cfg::{get_tool_store_path, read_server_cfg, write_server_cfg, ServerCfg, SshCredential};
pub use image_util::{
    is_blank_image, load_from_memory, placeholder, process_thumbnail, read_image, FileType,
    THUMB_SIZE,
};
pub use result::{ThumbError, ThumbResult};
pub use ssh::{
    expand_tilde, shell_quote, with_connection, ConnState, ConnectionFactory, SshConnection,
    SshFactory, Transport,
};
pub use thumbnail::{ThumbnailEngine, SEEK_TIMESTAMPS};
pub use tool::{ensure_tool_available, ToolPaths, TOOL_PROBE_PATHS};
pub use visibility::VisibilitySet;
