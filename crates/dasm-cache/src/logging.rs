use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber with the given env-filter
/// directives (e.g. `"info,dasm_cache=trace"`).
pub fn init(env_filter: &str) {
    fmt()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_target(true)
        .init();
}
