pub mod catalog;
pub mod config;
pub mod core;
pub mod model;
pub mod processing;

/// Install the process-wide diagnostics stack: color-eyre error reports and
/// an env-filtered tracing subscriber with span traces. Call once at startup.
pub fn install_diagnostics() -> eyre::Result<()> {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::{prelude::*, EnvFilter};

    color_eyre::install()?;
    tracing_subscriber::registry()
        .with(EnvFilter::from_env("PICTOR_LOG"))
        .with(ErrorLayer::default())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    Ok(())
}
