//! Field-crew timesheet portal backend.
//!
//! Foremen submit per-painter work/lunch times and consumable usage against
//! a job; submissions are stored durably here and mirrored asynchronously
//! into Zoho CRM, which stays the system of record for payroll. A
//! cron-triggered reconciliation pass pulls projects, portal users, and
//! user-to-project links back from the CRM so the portal only offers jobs a
//! foreman is assigned to.

pub mod cache;
pub mod config;
pub mod db;
pub mod hours;
pub mod http;
pub mod model;
pub mod recon;
pub mod sync;
pub mod zoho;
