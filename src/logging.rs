//! Logging configuration.
//!
//! Sets up tracing-based logging. On Linux the systemd journal can be used
//! when requested; otherwise logs go to a daily rolling file when a log
//! directory is configured, or to stderr.

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Initialize the logging system.
///
/// Log level can be controlled via the `IMGSHELF_LOG` environment variable:
/// - `IMGSHELF_LOG=debug` for verbose output
/// - `IMGSHELF_LOG=info` for standard output (default)
/// - `IMGSHELF_LOG=warn` for warnings and errors only
/// - `IMGSHELF_LOG=imgshelf=debug,tower_http=info` for per-target levels
pub fn init(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_env("IMGSHELF_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(target_os = "linux")]
    {
        if config.journald {
            if let Ok(journald_layer) = tracing_journald::layer() {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(journald_layer)
                    .init();

                tracing::info!("Logging initialized with journald backend");
                return Ok(());
            }
        }
    }

    if let Some(log_dir) = &config.dir {
        std::fs::create_dir_all(log_dir)?;

        let file_appender = tracing_appender::rolling::daily(log_dir, "imgshelf.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        // The guard flushes on drop, so it has to outlive the process.
        static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
            std::sync::OnceLock::new();
        let _ = GUARD.set(guard);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
            .init();

        tracing::info!("Logging initialized with file backend at {:?}", log_dir);
        return Ok(());
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}
