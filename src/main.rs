use std::path::PathBuf;

use clap::Parser;
use tracing::error;

use rtlib::{
    cfg, get_tool_store_path, tracing_setup::tracing_setup, SshFactory, ThumbCacheCfg,
    ThumbnailEngine,
};

/// Generates a thumbnail for a file on a remote SSH host.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Server definition as a TOML file
    #[arg(long, short)]
    server: PathBuf,
    /// Path of the file on the remote host
    remote_path: String,
    /// Where to write the thumbnail
    #[arg(long, short, default_value = "thumb.png")]
    output: PathBuf,
}

fn run(args: Args) -> rtlib::ThumbResult<()> {
    let server = cfg::read_server_cfg(&args.server)?;
    let engine = ThumbnailEngine::new(
        SshFactory,
        ThumbCacheCfg::default(),
        Some(get_tool_store_path()),
    );
    engine.visibility().mark_visible(&args.remote_path);
    let thumb = engine.get_thumbnail(&server, &args.remote_path)?;
    thumb
        .save(&args.output)
        .map_err(|e| rtlib::ThumbError::Io(format!("could not save {:?}, {e:?}", args.output)))?;
    println!("wrote {:?}", args.output);
    Ok(())
}

fn main() {
    let _guard = tracing_setup();
    let args = Args::parse();
    if let Err(e) = run(args) {
        error!("{e}");
        std::process::exit(1);
    }
}
