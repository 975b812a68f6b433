//! Pocketbook is a personal-finance tracker.
//!
//! This library contains the tracker's core: the recurrence scheduler that
//! turns stored recurring rules into transactions, the notification rule
//! engine that turns stored financial facts into user-facing alerts, and the
//! ledger operations they rely on. Both engines are batch units that take an
//! explicit processing date from their caller; they never read a wall clock,
//! which keeps the logic deterministic and easy to test.
//!
//! The peripherals of a full tracker, such as UI rendering, authentication,
//! and the transport that delivers a notification to a device, live outside
//! this crate. They interact with the core through the SQLite tables defined
//! here.

#![warn(missing_docs)]

mod database_id;
mod error;

pub mod db;
pub mod loan;
pub mod notification;
pub mod objective;
pub mod recurring;
pub mod rules;
pub mod scheduler;
pub mod transaction;
pub mod user;

pub use database_id::DatabaseID;
pub use db::initialize as initialize_db;
pub use error::Error;
pub use rules::{NotificationOutcome, RuleKind, run_notification_rules};
pub use scheduler::{SchedulerOutcome, run_recurring_scheduler};
pub use user::UserID;
