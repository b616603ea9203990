use std::fs;
use std::io;
use std::path::Path;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mzisoscanner::{MZIsoScanner, MZIsoScannerError};

fn default_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy()
}

fn configure_log(log_file: Option<&Path>) -> Result<Option<WorkerGuard>, MZIsoScannerError> {
    let (file_layer, guard) = match log_file {
        Some(path) => {
            let handle = fs::File::create(path)?;
            let (writer, guard) = tracing_appender::non_blocking(handle);
            let layer = fmt::layer()
                .compact()
                .with_ansi(false)
                .with_timer(fmt::time::ChronoLocal::rfc_3339())
                .with_writer(writer)
                .with_filter(default_filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .compact()
                .with_timer(fmt::time::ChronoLocal::rfc_3339())
                .with_writer(io::stderr)
                .with_filter(default_filter()),
        )
        .with(file_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| MZIsoScannerError::LogSetupError(e.to_string()))?;
    tracing_log::LogTracer::init().map_err(|e| MZIsoScannerError::LogSetupError(e.to_string()))?;
    Ok(guard)
}

fn main() -> Result<(), MZIsoScannerError> {
    let args = MZIsoScanner::parse().configure()?;
    let _guard = configure_log(args.log_file.as_deref())?;
    if let Err(e) = args.main() {
        tracing::error!("{e}");
        return Err(e);
    }
    Ok(())
}
