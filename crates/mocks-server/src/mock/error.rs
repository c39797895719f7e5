use super::handlers::HandlerError;
use super::validation::ValidationError;
use crate::config::ConfigError;
use thiserror::Error;

/// Errors surfaced by the mock engine to its callers.
#[derive(Debug, Error)]
pub enum MockError {
    /// No selected route answers the request. Transports map this to 404.
    #[error("No route found for {method} {path}")]
    RouteNotFound { method: String, path: String },

    #[error("Collection '{0}' not found")]
    CollectionNotFound(String),

    #[error("Route '{0}' not found")]
    UnknownRoute(String),

    #[error("Route variant '{0}' not found")]
    UnknownVariant(String),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum ReloadError {
    /// The new definitions were rejected; the previous mock set stays active.
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("Mock engine has been stopped")]
    Stopped,
}
