use std::sync::Once;

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::file_util::get_log_folder;

fn panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let trace = backtrace::Backtrace::new();
        tracing::error!("{info:?}");
        tracing::error!("{trace:?}");
    }));
}

/// Installs the global subscriber, logging to stdout and to a daily rolling
/// file under the application's log folder. The returned guard must stay
/// alive for the file writer to flush.
pub fn tracing_setup() -> WorkerGuard {
    let log_folder = get_log_folder();
    let file_appender = tracing_appender::rolling::daily(&log_folder, "remthumb.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(filter),
        )
        .with(fmt::layer().with_writer(std::io::stdout))
        .init();
    panic_hook();
    info!("logging to {log_folder:?}");
    guard
}

/// Test processes share one global subscriber; repeated calls are no-ops.
pub fn init_tracing_for_tests() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .init();
    });
}
