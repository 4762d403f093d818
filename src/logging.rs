//! Process-wide tracing setup.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over `default_filter`.
///
/// Logs go to stderr so command output on stdout stays pipeable.
/// Calling this twice is harmless; the second call is ignored.
pub fn init(default_filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Default filter for a verbosity flag.
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "context_brief=debug,context_brief_core=debug,tower_http=debug"
    } else {
        "context_brief=info,context_brief_core=info"
    }
}
