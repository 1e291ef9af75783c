//! The plan produced for a coordinator INSERT ... SELECT.

use serde_json::json;

use crate::config::ExplainFormat;
use crate::error::{DeferredError, FunnelError};
use crate::query::{Oid, Query, TargetEntry};

/// Name of the custom scan in EXPLAIN output.
pub const CUSTOM_SCAN_NAME: &str = "Funnel INSERT ... SELECT via coordinator";

/// Result of splitting an INSERT ... SELECT.
///
/// A plan may carry a `planning_error`: the strategy cannot run this
/// statement, but planning itself succeeded so the caller may still try
/// another strategy, explain the plan, or raise the error when execution
/// begins.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DistributedPlan {
    /// The standalone SELECT, aligned with `insert_target_list`.
    pub insert_select_query: Option<Query>,
    /// One entry per destination column, in output order.
    pub insert_target_list: Vec<TargetEntry>,
    pub target_relation_id: Option<Oid>,
    pub target_relation_name: Option<String>,
    pub planning_error: Option<DeferredError>,
}

impl DistributedPlan {
    /// A plan with nothing populated except the deferred error.
    pub fn failed(error: DeferredError) -> Self {
        Self {
            planning_error: Some(error),
            ..Self::default()
        }
    }

    /// Raise the deferred error, if any.
    pub fn check_planning_error(&self) -> Result<(), FunnelError> {
        match &self.planning_error {
            Some(error) => Err(error.clone().raise()),
            None => Ok(()),
        }
    }

    /// Destination column names, from the insert target list.
    pub fn insert_column_names(&self) -> Vec<String> {
        self.insert_target_list
            .iter()
            .map(|tle| tle.resname.clone().unwrap_or_default())
            .collect()
    }

    /// Render the plan for EXPLAIN.
    pub fn explain(&self, format: ExplainFormat) -> Result<String, FunnelError> {
        let query_sql = self.insert_select_query.as_ref().map(Query::deparse);
        match format {
            ExplainFormat::Text => {
                let mut out = format!("Custom Scan ({CUSTOM_SCAN_NAME})");
                if let Some(name) = &self.target_relation_name {
                    out.push_str(&format!(
                        "\n  Target: {name} ({})",
                        self.insert_column_names().join(", ")
                    ));
                }
                if let Some(sql) = &query_sql {
                    out.push_str(&format!("\n  Query: {sql}"));
                }
                if let Some(error) = &self.planning_error {
                    out.push_str(&format!("\n  Planning Error: {error}"));
                }
                Ok(out)
            }
            ExplainFormat::Json => {
                let doc = json!({
                    "Node Type": "Custom Scan",
                    "Custom Plan Provider": CUSTOM_SCAN_NAME,
                    "Target Relation": self.target_relation_name,
                    "Target Relation OID": self.target_relation_id,
                    "Columns": self.insert_column_names(),
                    "Query": query_sql,
                    "Planning Error": self.planning_error,
                });
                serde_json::to_string_pretty(&doc)
                    .map_err(|e| FunnelError::InternalError(format!("EXPLAIN serialization: {e}")))
            }
        }
    }
}
