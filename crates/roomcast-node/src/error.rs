//! Node-level error type and its mapping onto wire error codes.

use roomcast_proto::{ContentError, ErrorCode};
use thiserror::Error;

use crate::{peers::PeerError, state::StateError};

/// Errors surfaced by node operations.
///
/// Every variant maps onto exactly one stable [`ErrorCode`] so endpoint code
/// can translate failures into typed wire errors without string matching.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The referenced room does not exist here (or anywhere reachable).
    #[error("room not found")]
    RoomNotFound,

    /// The user is not a member of the room (or the session is not
    /// subscribed to it).
    #[error("user is not a member of this room")]
    NotMember,

    /// Message content failed validation.
    #[error(transparent)]
    InvalidContent(#[from] ContentError),

    /// The request was malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The room is in a lifecycle state that forbids the operation.
    #[error("room is in {0} state")]
    InvalidState(String),

    /// The requester is not permitted to perform the operation.
    #[error("only the room creator may delete the room")]
    Unauthorized,

    /// The room's administrator node could not be reached.
    #[error("administrator node unavailable: {0}")]
    AdminUnavailable(String),

    /// A distributed deletion was aborted or rolled back.
    #[error("deletion failed: {0}")]
    DeletionFailed(String),

    /// A remote administrator rejected the operation with a typed error;
    /// the remote code is passed through unchanged.
    #[error("{1}")]
    Remote(ErrorCode, String),

    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl NodeError {
    /// The stable wire code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::RoomNotFound => ErrorCode::RoomNotFound,
            Self::NotMember => ErrorCode::NotMember,
            Self::InvalidContent(_) => ErrorCode::InvalidContent,
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::InvalidState(_) => ErrorCode::InvalidState,
            Self::Unauthorized => ErrorCode::Unauthorized,
            Self::AdminUnavailable(_) => ErrorCode::AdminNodeUnavailable,
            Self::DeletionFailed(_) => ErrorCode::DeletionFailed,
            Self::Remote(code, _) => *code,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }
}

impl From<StateError> for NodeError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::RoomNotFound => Self::RoomNotFound,
            StateError::NotMember => Self::NotMember,
            StateError::NameInUse(name) => {
                Self::InvalidRequest(format!("room with name '{name}' already exists"))
            }
            StateError::InvalidState(lifecycle) => Self::InvalidState(lifecycle.to_string()),
        }
    }
}

impl From<PeerError> for NodeError {
    fn from(err: PeerError) -> Self {
        match err {
            // A remote node answered with a typed error: pass its code
            // through rather than masking it as unavailability.
            PeerError::Remote { code, error } => Self::Remote(code, error),
            other => Self::AdminUnavailable(other.to_string()),
        }
    }
}
