use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    EnvFilter, filter::Targets, fmt, prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};

const LOG_TARGET: &str = env!("CARGO_CRATE_NAME");

/// Level for this crate's events. Passes and rate fetches log at debug.
fn crate_level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::OFF
    }
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over `verbose`
/// for dependencies such as reqwest and fjall.
pub fn init_logging(verbose: bool) {
    let level = crate_level(verbose);
    let crate_filter = Targets::new().with_target(LOG_TARGET, level);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    tracing_subscriber::registry()
        .with(fmt::layer().pretty().without_time())
        .with(crate_filter)
        .with(env_filter)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_level_follows_verbose_flag() {
        assert_eq!(LOG_TARGET, "yen_to_freedom");
        assert_eq!(crate_level(true), LevelFilter::DEBUG);
        assert_eq!(crate_level(false), LevelFilter::OFF);
        assert_eq!(crate_level(false).to_string(), "off");
    }
}
