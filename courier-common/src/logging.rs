use std::str::FromStr;

use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, $($msg:expr),*) => {{
        let span = $crate::tracing::span!($level, $span);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg),*)
    }};
}

#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::internal!(level = TRACE, $($msg),*)
    };
}

#[macro_export]
macro_rules! dispatch {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "dispatch", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::dispatch!(level = DEBUG, $($msg),*)
    };
}

/// Resolve the level filter from a `LOG_LEVEL` style value, falling back to
/// `default` when absent or unparseable.
#[must_use]
pub fn level_filter(value: Option<&str>, default: LevelFilter) -> LevelFilter {
    value.map_or(default, |level| {
        LevelFilter::from_str(level).unwrap_or_else(|_| {
            eprintln!("Invalid log level specified {level}, defaulting to {default}");
            default
        })
    })
}

/// Install the global subscriber. Only events from `courier*` targets are kept.
pub fn init() {
    let default = if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };

    let level = level_filter(std::env::var("LOG_LEVEL").ok().as_deref(), default);

    tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_ansi(true)
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                .with_filter(level)
                .with_filter(FilterFn::new(|metadata| {
                    metadata.target().starts_with("courier")
                })),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_level_filter_parses_known_levels() {
        assert_eq!(level_filter(Some("warn"), LevelFilter::INFO), LevelFilter::WARN);
        assert_eq!(level_filter(Some("DEBUG"), LevelFilter::INFO), LevelFilter::DEBUG);
        assert_eq!(level_filter(Some("off"), LevelFilter::INFO), LevelFilter::OFF);
    }

    #[test]
    fn test_level_filter_falls_back_to_default() {
        assert_eq!(level_filter(None, LevelFilter::TRACE), LevelFilter::TRACE);
        assert_eq!(
            level_filter(Some("verbose"), LevelFilter::INFO),
            LevelFilter::INFO
        );
    }
}
