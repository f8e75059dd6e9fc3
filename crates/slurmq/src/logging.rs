//! Diagnostic logging to stderr.

use slurmq_config::LOG_ENV;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

/// Level used when `SLURMQ_LOG` is unset.
fn default_level(verbose: bool, quiet: bool) -> LevelFilter {
    if verbose {
        LevelFilter::DEBUG
    } else if quiet {
        LevelFilter::ERROR
    } else {
        LevelFilter::WARN
    }
}

fn filter(verbose: bool, quiet: bool) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(default_level(verbose, quiet).into())
        .with_env_var(LOG_ENV)
        .from_env_lossy()
}

pub fn init(verbose: bool, quiet: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(filter(verbose, quiet))
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .compact()
        .init();
}
