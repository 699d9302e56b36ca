use grid_core::{LogFormat, Settings};
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber on stderr so command output on stdout
/// stays machine readable. `RUST_LOG` wins over the configured level.
pub fn init(settings: Option<&Settings>) {
    let (level, format) = settings
        .map(|settings| (settings.logging.level.as_str(), settings.logging.format))
        .unwrap_or(("warn", LogFormat::Compact));
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    // A subscriber may already be installed by an embedding process.
    let _ = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
