//! Logging initialization shared by Proratio binaries
//!
//! Filter resolution follows a fixed priority order:
//! 1. CLI flags (`-v/-q`) - highest priority
//! 2. RUST_LOG environment variable
//! 3. Binary-specific defaults - lowest priority

use anyhow::Result;
use clap_verbosity_flag::{LogLevel, Verbosity};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Resolve the filter directive that `init_logging` would install.
pub fn resolve_filter<L: LogLevel>(verbosity: &Verbosity<L>, default_filter: &str) -> String {
    if verbosity.is_present() {
        return verbosity.log_level_filter().to_string().to_lowercase();
    }

    std::env::var("RUST_LOG")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default_filter.to_string())
}

/// Initialize logging with the specified verbosity level and default filter.
///
/// # Example
///
/// ```no_run
/// use clap::Parser;
/// use clap_verbosity_flag::{Verbosity, WarnLevel};
/// use proratio_common::logging;
///
/// #[derive(Parser)]
/// struct Args {
///     #[clap(flatten)]
///     verbosity: Verbosity<WarnLevel>,
/// }
///
/// let args = Args::parse();
/// logging::init_logging(&args.verbosity, "proratio_billing=info").unwrap();
/// ```
pub fn init_logging<L: LogLevel>(verbosity: &Verbosity<L>, default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_new(resolve_filter(verbosity, default_filter))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .try_init()?;

    Ok(())
}

/// Initialize logging for CLI tools that stay quiet unless asked.
///
/// Returns `true` when a subscriber was installed, `false` when neither
/// verbosity flags nor RUST_LOG were given.
pub fn init_cli_logging<L: LogLevel>(
    verbosity: &Verbosity<L>,
    default_filter: &str,
) -> Result<bool> {
    if verbosity.is_present() || std::env::var("RUST_LOG").is_ok() {
        init_logging(verbosity, default_filter)?;
        Ok(true)
    } else {
        Ok(false)
    }
}
