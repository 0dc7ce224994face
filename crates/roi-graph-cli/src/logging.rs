//! Subscriber setup.

use tracing_subscriber::{fmt, EnvFilter};

/// Install the stderr subscriber.
///
/// `-v` counts override everything; without them `RUST_LOG` wins over the
/// configured level.
pub fn init(verbose: u8, configured_level: &str, include_location: bool) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured_level)),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    // A second init in the same process is a no-op.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_file(include_location)
        .with_line_number(include_location)
        .with_writer(std::io::stderr)
        .try_init();
}
