//! Routing of `log` records into the PostgreSQL server log.
//!
//! The planner and executor log through the `log` facade. Inside the
//! extension, [`install_pg_logger`] forwards those records to `ereport`
//! through pgrx. Records are never reported at `ERROR`, which would abort
//! the transaction; errors travel as [`FunnelError`](crate::error::FunnelError)
//! values instead.

/// Server log severity a record is reported at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgSeverity {
    Debug1,
    Log,
    Warning,
}

pub fn severity_for(level: log::Level) -> PgSeverity {
    match level {
        log::Level::Error | log::Level::Warn => PgSeverity::Warning,
        log::Level::Info => PgSeverity::Log,
        log::Level::Debug | log::Level::Trace => PgSeverity::Debug1,
    }
}

#[cfg(feature = "pg18")]
pub use pg::install_pg_logger;

#[cfg(feature = "pg18")]
mod pg {
    use super::{PgSeverity, severity_for};
    use crate::config::FunnelSettings;

    struct PgLogger;

    static LOGGER: PgLogger = PgLogger;

    impl log::Log for PgLogger {
        fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
            // pg_funnel.log_level can change within a session.
            metadata.level() <= FunnelSettings::current().level_filter()
        }

        fn log(&self, record: &log::Record<'_>) {
            if !self.enabled(record.metadata()) {
                return;
            }
            match severity_for(record.level()) {
                PgSeverity::Debug1 => pgrx::debug1!("pg_funnel: {}", record.args()),
                PgSeverity::Log => pgrx::log!("pg_funnel: {}", record.args()),
                PgSeverity::Warning => pgrx::warning!("pg_funnel: {}", record.args()),
            }
        }

        fn flush(&self) {}
    }

    /// Install the forwarding logger. Later calls have no effect.
    pub fn install_pg_logger() {
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(log::LevelFilter::Trace);
        }
    }
}
