//! Planning of `INSERT ... SELECT` via the coordinator.
//!
//! The combined statement is split into a standalone SELECT whose output is
//! aligned and type-corrected against the target table, plus the insert
//! target list that names the destination columns.
//!
//! # Submodules
//! - `cte_levels`: fix CTE scope references after relocating a WITH list
//! - `reorder`: positional alignment of insert and select target lists
//! - `insert_select`: the statement splitter

pub mod cte_levels;
pub mod insert_select;
pub mod reorder;

pub use cte_levels::decrement_cte_levels;
pub use insert_select::{create_coordinator_insert_select_plan, plan_insert_select};
pub use reorder::reorder_insert_select_target_lists;
