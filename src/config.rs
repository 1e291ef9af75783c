//! Configuration for pg_funnel.
//!
//! Inside PostgreSQL the settings are GUC variables prefixed with
//! `pg_funnel.`, registered in `_PG_init()`. The planner and executor never
//! read GUCs directly: they receive a [`FunnelSettings`] snapshot, taken with
//! [`FunnelSettings::current`] or built from JSON for tests and tools.

use serde::{Deserialize, Serialize};

use crate::error::FunnelError;

/// Output format of `EXPLAIN` for a coordinator INSERT ... SELECT plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplainFormat {
    #[default]
    Text,
    Json,
}

impl ExplainFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "text" => Some(ExplainFormat::Text),
            "json" => Some(ExplainFormat::Json),
            _ => None,
        }
    }
}

/// A snapshot of every pg_funnel setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunnelSettings {
    /// Plan INSERT ... SELECT into distributed tables by collecting the
    /// SELECT on the coordinator.
    pub enable_coordinator_insert_select: bool,
    /// Abort the statement on the first row the writer refuses, instead of
    /// skipping and counting it.
    pub copy_stop_on_failure: bool,
    /// Minimum level forwarded to the server log.
    pub log_level: String,
    pub explain_format: ExplainFormat,
}

impl Default for FunnelSettings {
    fn default() -> Self {
        Self {
            enable_coordinator_insert_select: true,
            copy_stop_on_failure: false,
            log_level: "notice".to_string(),
            explain_format: ExplainFormat::Text,
        }
    }
}

impl FunnelSettings {
    /// Parse settings from JSON. Missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, FunnelError> {
        serde_json::from_str(json)
            .map_err(|e| FunnelError::rejected(format!("invalid pg_funnel settings: {e}")))
    }

    /// The settings in effect for the current session.
    #[cfg(feature = "pg18")]
    pub fn current() -> Self {
        Self {
            enable_coordinator_insert_select: PGF_ENABLE_COORDINATOR_INSERT_SELECT.get(),
            copy_stop_on_failure: PGF_COPY_STOP_ON_FAILURE.get(),
            log_level: pg_funnel_log_level(),
            explain_format: ExplainFormat::parse(&pg_funnel_explain_format()).unwrap_or_default(),
        }
    }

    /// The settings in effect for the current session.
    #[cfg(not(feature = "pg18"))]
    pub fn current() -> Self {
        Self::default()
    }

    /// `log_level` mapped onto the `log` crate's filter.
    pub fn level_filter(&self) -> log::LevelFilter {
        match self.log_level.to_ascii_lowercase().as_str() {
            "debug5" | "debug4" | "debug3" => log::LevelFilter::Trace,
            "debug2" | "debug1" | "debug" => log::LevelFilter::Debug,
            "info" | "notice" | "log" => log::LevelFilter::Info,
            "warning" => log::LevelFilter::Warn,
            "error" => log::LevelFilter::Error,
            _ => log::LevelFilter::Info,
        }
    }
}

#[cfg(feature = "pg18")]
pub use gucs::*;

#[cfg(feature = "pg18")]
mod gucs {
    use pgrx::guc::*;

    /// Whether coordinator INSERT ... SELECT planning is enabled.
    pub static PGF_ENABLE_COORDINATOR_INSERT_SELECT: GucSetting<bool> =
        GucSetting::<bool>::new(true);

    /// Writer failure policy.
    pub static PGF_COPY_STOP_ON_FAILURE: GucSetting<bool> = GucSetting::<bool>::new(false);

    /// Minimum level of messages forwarded from the `log` facade.
    pub static PGF_LOG_LEVEL: GucSetting<Option<std::ffi::CString>> =
        GucSetting::<Option<std::ffi::CString>>::new(Some(c"notice"));

    pub static PGF_EXPLAIN_FORMAT: GucSetting<Option<std::ffi::CString>> =
        GucSetting::<Option<std::ffi::CString>>::new(Some(c"text"));

    /// Register all GUC variables. Called from `_PG_init()`.
    pub fn register_gucs() {
        GucRegistry::define_bool_guc(
            c"pg_funnel.enable_coordinator_insert_select",
            c"Enables INSERT ... SELECT via the coordinator.",
            c"When false, INSERT ... SELECT into a distributed table fails at execution time.",
            &PGF_ENABLE_COORDINATOR_INSERT_SELECT,
            GucContext::Userset,
            GucFlags::default(),
        );

        GucRegistry::define_bool_guc(
            c"pg_funnel.copy_stop_on_failure",
            c"Abort INSERT ... SELECT on the first rejected row.",
            c"When false, rows that violate a constraint are skipped and reported as a warning.",
            &PGF_COPY_STOP_ON_FAILURE,
            GucContext::Userset,
            GucFlags::default(),
        );

        GucRegistry::define_string_guc(
            c"pg_funnel.log_level",
            c"Minimum level of pg_funnel messages sent to the server log.",
            c"One of debug5..debug1, log, info, notice, warning, error.",
            &PGF_LOG_LEVEL,
            GucContext::Suset,
            GucFlags::default(),
        );

        GucRegistry::define_string_guc(
            c"pg_funnel.explain_format",
            c"EXPLAIN output format for coordinator INSERT ... SELECT: text or json.",
            c"",
            &PGF_EXPLAIN_FORMAT,
            GucContext::Userset,
            GucFlags::default(),
        );
    }

    // ── Convenience accessors ──────────────────────────────────────────────

    /// Returns the current value of `pg_funnel.log_level`.
    pub fn pg_funnel_log_level() -> String {
        PGF_LOG_LEVEL
            .get()
            .map(|cs| cs.to_str().unwrap_or("notice").to_string())
            .unwrap_or_else(|| "notice".to_string())
    }

    /// Returns the current value of `pg_funnel.explain_format`.
    pub fn pg_funnel_explain_format() -> String {
        PGF_EXPLAIN_FORMAT
            .get()
            .map(|cs| cs.to_str().unwrap_or("text").to_string())
            .unwrap_or_else(|| "text".to_string())
    }
}
