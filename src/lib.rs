pub mod console;
pub mod error;
pub mod events;
pub mod focus;
pub mod idle;
pub mod lock;
pub mod notify;
pub mod paths;
pub mod pin;
pub mod profiles;
pub mod settings;
pub mod shell;
pub mod surface;
pub mod views;

use tracing_subscriber::EnvFilter;

/// Installs the stderr log subscriber. `RUST_LOG` overrides the default
/// `info` filter.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
