use kouri_config::LoggingConfig;
use kouri_core::{KouriError, Result};
use std::fs::OpenOptions;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

/// Install the global tracing subscriber. `RUST_LOG` wins over the configured
/// level. Returns `false` if a subscriber was already installed.
pub fn init(config: &LoggingConfig) -> Result<bool> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let writer = match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| KouriError::Config(format!("cannot open log file {}: {}", path.display(), e)))?;
            BoxMakeWriter::new(std::sync::Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };
    let ansi = config.file.is_none();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi);

    let installed = match config.format.as_str() {
        "json" => builder.json().with_target(true).try_init(),
        "compact" => builder.compact().with_target(false).try_init(),
        _ => builder.pretty().with_target(false).try_init(),
    };
    Ok(installed.is_ok())
}
