//! Error types for the stats engine.

use thiserror::Error;

use crate::ids::{GroupId, StatId};
use crate::kind::StatKind;

/// Engine-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Two groups were declared with the same id
    #[error("duplicate stat group id {0}")]
    DuplicateGroup(GroupId),

    /// Two stats were declared with the same id
    #[error("duplicate stat id {0}")]
    DuplicateStat(StatId),

    /// A stat was declared with an id the engine reserves for itself
    #[error("stat id {0} is reserved (error sentinel, tree root or runtime-named range)")]
    ReservedStat(StatId),

    /// A declaration arrived after the manager was initialized
    #[error("stat or group registered after the stat manager was initialized")]
    RegisteredAfterInit,

    /// A stat names a group that was never declared
    #[error("stat {stat} belongs to undeclared group {group}")]
    UnknownGroup {
        /// The offending stat
        stat: StatId,
        /// The group it asked for
        group: GroupId,
    },

    /// The global manager was initialized twice
    #[error("stat manager already initialized")]
    AlreadyInitialized,

    /// No stat with this id exists
    #[error("unknown stat {0}")]
    UnknownStat(StatId),

    /// A typed accessor was used on a stat of another kind
    #[error("stat {stat} is a {found:?}, expected {expected:?}")]
    KindMismatch {
        /// The stat that was accessed
        stat: StatId,
        /// Kind the accessor works with
        expected: StatKind,
        /// Kind the stat was declared with
        found: StatKind,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Capture file is not in the expected format
    #[error("Malformed capture: {0}")]
    MalformedCapture(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
