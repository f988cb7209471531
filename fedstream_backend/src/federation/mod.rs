pub mod codec;
pub mod feed;
pub mod identity;
pub mod inbox;
pub mod outbox;
pub mod registry;

use thiserror::Error;

/// Failure taxonomy for inbound and outbound federation traffic. The API
/// layer maps these onto wire status codes; nothing here aborts the request
/// pipeline.
#[derive(Debug, Error)]
pub enum FederationError {
    #[error("malformed identifier `{0}`")]
    MalformedIdentifier(String),
    /// The payload could not be interpreted as a known activity.
    #[error("{0}")]
    Unprocessable(String),
    /// A named protocol gap: the operation is recognized but deliberately
    /// unhandled in this protocol revision.
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
