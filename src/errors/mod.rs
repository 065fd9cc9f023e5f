pub mod types;

pub use types::{AppError, ChannelError, RepositoryError};

/// Result alias used throughout the service layer
pub type AppResult<T> = Result<T, AppError>;
