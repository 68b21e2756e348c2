//! Database module: entity models and SQL repositories.
//!
//! Split into two submodules:
//! - `model`: typed view structs returned by repositories.
//! - `repo`: SQL-only functions that map rows into those structs.
//!
//! External modules should import from `crewsheet::db`; the repository API
//! and the commonly used view models are re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{NewTimesheet, NewTimesheetRow, RowForSync, TimesheetForSync, TimesheetSummary};
