//! The transport-independent error taxonomy every fallible core operation returns.

use std::fmt;

/// One error per category in the taxonomy. Handlers translate these into wire
/// error codes; the core never inspects or formats beyond what `Display` gives it.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid argument")]
    InvalidArgument,

    #[error("no file named {0:?}")]
    NotFound(String),

    #[error("file {0:?} already exists")]
    AlreadyExists(String),

    #[error("client {client} has not opened {name:?}")]
    NotOpen { name: String, client: super::ClientId },

    #[error("file {name:?} is locked by another client")]
    Busy { name: String },

    #[error("{0}")]
    Permission(PermissionKind),

    #[error("write of {len} bytes to {name:?} exceeds the byte cap")]
    TooLarge { name: String, len: usize },

    #[error("eviction exhausted the queue while making room for {name:?}")]
    CapacityExhausted { name: String },

    #[error("store invariant broken: {0}")]
    NotRecoverable(String),
}

/// `permission` has two distinct shapes in the spec (whole-file write without
/// write-eligibility, and unlock/remove by a non-owner); kept distinguishable
/// so a handler can log the right thing without string-matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionKind {
    NotWriteEligible,
    NotOwner,
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionKind::NotWriteEligible => {
                write!(f, "whole-file write attempted without write-eligibility")
            }
            PermissionKind::NotOwner => write!(f, "caller does not own the lock"),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
