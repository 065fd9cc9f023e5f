//! Error type definitions for the job monitor
//!
//! This module defines all error types used throughout the application,
//! providing a hierarchical error system that makes debugging and error
//! handling more straightforward.

use thiserror::Error;

use crate::models::JobState;

/// Top-level application error type
///
/// This enum represents all possible errors that can occur in the application.
/// It uses `thiserror` to provide automatic error trait implementations and
/// proper error chaining.
#[derive(Error, Debug)]
pub enum AppError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Repository layer errors
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Notification channel errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Resource not found errors
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// State transitions outside the lifecycle table
    #[error("Invalid transition: {event} while {state}")]
    InvalidTransition { state: JobState, event: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Repository layer specific errors
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// SQL query execution failures
    #[error("Query failed: {query} - {message}")]
    QueryFailed { query: String, message: String },

    /// Constraint violations (unique, foreign key, etc.)
    #[error("Constraint violation: {constraint} - {message}")]
    ConstraintViolation { constraint: String, message: String },

    /// Record not found
    #[error("Record not found: {table} with {field} = {value}")]
    RecordNotFound {
        table: String,
        field: String,
        value: String,
    },

    /// Migration failures
    #[error("Migration failed: {version} - {message}")]
    MigrationFailed { version: String, message: String },
}

/// Notification channel (external alerting backend) errors
#[derive(Error, Debug)]
pub enum ChannelError {
    /// HTTP errors from webhook deliveries
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend accepted the request but rejected the event
    #[error("Delivery rejected: {status} - {message}")]
    Rejected { status: u16, message: String },

    /// Channel record is missing required configuration
    #[error("Invalid channel configuration: {message}")]
    InvalidConfig { message: String },
}

/// Convenience methods for creating common error types
impl AppError {
    /// Create a validation error with a custom message
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not found error for a specific resource
    pub fn not_found<R: Into<String>, I: Into<String>>(resource: R, id: I) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create an invalid transition error for a lifecycle event
    pub fn invalid_transition<E: Into<String>>(state: JobState, event: E) -> Self {
        Self::InvalidTransition {
            state,
            event: event.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wrap a storage-layer failure with the operation that hit it
    pub fn storage<O: Into<String>>(operation: O, err: anyhow::Error) -> Self {
        Self::Repository(RepositoryError::query_failed(operation, err.to_string()))
    }
}

impl RepositoryError {
    /// Create a query failed error
    pub fn query_failed<Q: Into<String>, M: Into<String>>(query: Q, message: M) -> Self {
        Self::QueryFailed {
            query: query.into(),
            message: message.into(),
        }
    }

    /// Create a record not found error
    pub fn record_not_found<T: Into<String>, F: Into<String>, V: Into<String>>(
        table: T,
        field: F,
        value: V,
    ) -> Self {
        Self::RecordNotFound {
            table: table.into(),
            field: field.into(),
            value: value.into(),
        }
    }
}

impl ChannelError {
    /// Create a rejected delivery error
    pub fn rejected<M: Into<String>>(status: u16, message: M) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config<M: Into<String>>(message: M) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}
