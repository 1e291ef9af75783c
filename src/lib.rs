//! pg_funnel: coordinator-side INSERT ... SELECT for distributed tables.
//!
//! When the rows of an `INSERT INTO distributed_table SELECT ...` cannot be
//! pushed down to the shards, the coordinator plans the SELECT on its own,
//! runs it locally and streams the result into the target table through a
//! COPY writer that routes every row to its shard.
//!
//! - [`planner`] splits the INSERT ... SELECT into a stand-alone SELECT plus
//!   the target column list, recording unsupported constructs as deferred
//!   errors on the plan.
//! - [`executor`] runs the SELECT inside an invisible portal and hands its
//!   rows to a [`executor::CopyDestReceiver`].
//! - [`engine`] is an in-memory [`executor::GeneralPlanner`] used to run
//!   query trees without a server.
//!
//! Building with the `pg18` feature turns the crate into a PostgreSQL
//! extension: GUCs, the server-log bridge and SQL functions.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod catalog;
pub mod coerce;
pub mod config;
pub mod datum;
pub mod engine;
pub mod error;
pub mod executor;
pub mod hash;
pub mod logging;
pub mod plan;
pub mod planner;
pub mod query;
pub mod types;

#[cfg(feature = "pg18")]
::pgrx::pg_module_magic!();

/// Extension initialization, called when the shared library is loaded.
///
/// Registers GUC variables and routes `log` records to the server log.
#[cfg(feature = "pg18")]
#[allow(non_snake_case)]
#[pgrx::pg_guard]
pub extern "C-unwind" fn _PG_init() {
    config::register_gucs();
    logging::install_pg_logger();
    pgrx::log!("pg_funnel: initialized");
}
