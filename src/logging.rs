//! # Log sink setup.
//!
//! Installs the global `tracing` subscriber from a [`LogConfig`]. `RUST_LOG`
//! takes precedence over the configured level; `debug = true` forces `debug`.

use std::fs::File;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::config::{LogConfig, LogFormat};

/// Initializes global logging.
///
/// Fails if the log file cannot be created or a global subscriber is
/// already installed.
pub fn init(config: &LogConfig, debug: bool) -> anyhow::Result<()> {
    let level = if debug { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let writer = make_writer(&config.location)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(true);

    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))
}

fn make_writer(location: &str) -> anyhow::Result<BoxMakeWriter> {
    match location.trim().to_ascii_lowercase().as_str() {
        "" | "stderr" => Ok(BoxMakeWriter::new(std::io::stderr)),
        "stdout" => Ok(BoxMakeWriter::new(std::io::stdout)),
        _ => {
            let path = location.trim();
            let file = File::create(path)
                .map_err(|e| anyhow::anyhow!("unable to open log file {path}: {e}"))?;
            Ok(BoxMakeWriter::new(Mutex::new(file)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_location_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certvisor.log");
        make_writer(path.to_str().unwrap()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_directory_location_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(make_writer(dir.path().to_str().unwrap()).is_err());
    }
}
