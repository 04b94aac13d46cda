//! Process-wide log output for map merging runs.
//!
//! The merging crates only talk to the `log` facade: stage progress of the
//! pipeline ("computing features", "pairwise matching features", "estimating
//! final transform") and per-pair match statistics go out at `debug`, merged
//! grid summaries at `info`, and refused compositions at `warn`. Nothing is
//! printed until a host application installs a logger.
//!
//! Hosts without a logger of their own can call [`init_from_env`] and steer
//! verbosity with `MAP_MERGE_LOG=debug`, which prints lines like
//! `[   0.412s DEBUG map_merge::pipeline] computing features`. With feature
//! `tracing`, [`init_tracing`] installs a `tracing-subscriber` instead, taking
//! an `EnvFilter` directive from the same variable and timing each
//! instrumented stage.

use std::io::Write;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable read by [`init_from_env`].
pub const LOG_ENV: &str = "MAP_MERGE_LOG";

struct StderrLogger {
    level: LevelFilter,
    started: Instant,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let elapsed = self.started.elapsed().as_secs_f64();
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(
            stderr,
            "[{:8.3}s {:>5} {}] {}",
            elapsed,
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<StderrLogger> = OnceLock::new();

/// Install the stderr logger with the provided level filter.
///
/// Calling this more than once is a no-op after the first successful
/// initialization; the first level wins.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let logger = LOGGER.get_or_init(|| StderrLogger {
            level,
            started: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(level);
    }
    Ok(())
}

/// Install the stderr logger with the level named in `MAP_MERGE_LOG`
/// (`error`, `warn`, `info`, `debug`, `trace`, `off`), defaulting to `info`.
pub fn init_from_env() -> Result<(), log::SetLoggerError> {
    init_with_level(parse_level(std::env::var(LOG_ENV).ok().as_deref()))
}

fn parse_level(raw: Option<&str>) -> LevelFilter {
    raw.and_then(|raw| LevelFilter::from_str(raw.trim()).ok())
        .unwrap_or(LevelFilter::Info)
}

/// Install a global `tracing` subscriber filtered by `MAP_MERGE_LOG`.
///
/// `json` selects flattened JSON lines, otherwise human-readable output with
/// uptime stamps. Span close events carry the duration of each stage.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        let _ = fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .json()
            .flatten_event(true)
            .finish()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_a_no_op() {
        init_with_level(LevelFilter::Debug).expect("first install");
        init_with_level(LevelFilter::Trace).expect("second call is ignored");
        init_from_env().expect("env install is ignored too");
        log::debug!(target: "map_merge_core::tests", "logger installed");
        assert_eq!(LOGGER.get().map(|l| l.level), Some(LevelFilter::Debug));
    }

    #[test]
    fn env_level_parsing() {
        assert_eq!(parse_level(Some("debug")), LevelFilter::Debug);
        assert_eq!(parse_level(Some(" TRACE\n")), LevelFilter::Trace);
        assert_eq!(parse_level(Some("off")), LevelFilter::Off);
        assert_eq!(parse_level(Some("loud")), LevelFilter::Info);
        assert_eq!(parse_level(None), LevelFilter::Info);
    }
}
