//! Dead man's switch job monitor.
//!
//! External jobs ping when a run starts and when it ends; the monitor
//! tracks whether each job is on time, overdue, or stuck, and raises and
//! recovers alerts on subscribed notification channels.

pub mod assets;
pub mod config;
pub mod database;
pub mod errors;
pub mod jobs;
pub mod models;
pub mod notifications;
pub mod scheduling;
pub mod services;
pub mod sweeper;
pub mod utils;
pub mod web;

pub use errors::{AppError, AppResult};
