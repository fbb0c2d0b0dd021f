//! Error types of the engine.
//!
//! Almost everything that can go wrong in a cluster run is fatal: a missing peer or a broken
//! spill file cannot be recovered in the middle of a lazy pipeline. Eager operations therefore
//! return `Result` so the caller can print diagnostics and exit; lazy iterators go through
//! `fatal()`.

use std::io;

use thiserror::Error;

use crate::transport::Tag;

#[derive(Debug, Error)]
pub enum Error {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("could not resolve the identity of this process: {0}")]
    Identity(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("could not encode or decode a payload: {0}")]
    Codec(#[from] bincode::Error),

    #[error("node{rank} is not a member of group {group}")]
    NotInGroup { rank: usize, group: usize },

    #[error("tag {tag} is still in use by a running collective")]
    TagInFlight { tag: Tag },

    #[error("operation needs a non-empty group")]
    EmptyGroup,

    #[error("{0}")]
    Contract(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Aborts the current task. Used where an error surfaces inside a lazy iterator and there is
/// nobody left to return it to.
pub fn fatal(context: &str, err: Error) -> ! {
    tracing::error!(error = %err, "{}", context);
    panic!("{}: {}", context, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let e = Error::NotInGroup { rank: 3, group: 7 };
        assert_eq!(e.to_string(), "node3 is not a member of group 7");

        let e = Error::from(io::Error::new(io::ErrorKind::Other, "disk gone"));
        assert!(matches!(e, Error::Io(_)));
        assert_eq!(e.to_string(), "I/O error: disk gone");
    }

    #[test]
    #[should_panic(expected = "merging spill runs")]
    fn test_fatal_panics_with_context() {
        fatal("merging spill runs", Error::Contract(String::from("broken")));
    }
}
