//! Error types for the distributed partitioning protocol.

use thiserror::Error;

/// Failure of a collective operation between ranks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommError {
    /// A peer did not deliver its part of a collective in time.
    #[error("rank {rank}: no message from rank {peer} after {waited_ms} ms")]
    Timeout {
        /// Waiting rank
        rank: usize,
        /// Silent peer
        peer: usize,
        /// Time waited
        waited_ms: u64,
    },
    /// The channel to or from a peer was closed.
    #[error("rank {rank}: channel to rank {peer} disconnected")]
    Disconnected {
        /// Local rank
        rank: usize,
        /// Peer whose channel closed
        peer: usize,
    },
    /// Another rank failed and the cluster is shutting down.
    #[error("rank {rank}: aborted because another rank failed")]
    Aborted {
        /// Local rank
        rank: usize,
    },
    /// A payload length disagreed with the length announced beforehand.
    #[error("rank {rank}: rank {peer} announced {expected} items but sent {got}")]
    SizeMismatch {
        /// Receiving rank
        rank: usize,
        /// Sending rank
        peer: usize,
        /// Announced length
        expected: usize,
        /// Received length
        got: usize,
    },
    /// A message carried a payload of the wrong type for the collective.
    #[error("rank {rank}: unexpected payload type from rank {peer}")]
    UnexpectedPayload {
        /// Receiving rank
        rank: usize,
        /// Sending rank
        peer: usize,
    },
}

/// Errors surfaced by the body system and the cluster runner.
#[derive(Error, Debug)]
pub enum PartitionError {
    /// A collective failed.
    #[error("communication fault: {0}")]
    Communication(#[from] CommError),

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reading a configuration file failed.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing a configuration file failed.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// A rank thread panicked.
    #[error("rank {rank} panicked")]
    RankPanicked {
        /// Rank whose thread panicked
        rank: usize,
    },
}

impl PartitionError {
    /// `true` for errors that only exist because some other rank failed first.
    pub fn is_secondary(&self) -> bool {
        matches!(self, PartitionError::Communication(CommError::Aborted { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comm_error_converts_into_partition_error() {
        fn fails() -> Result<(), PartitionError> {
            Err::<(), _>(CommError::Timeout { rank: 1, peer: 2, waited_ms: 50 })?;
            Ok(())
        }
        let err = fails().unwrap_err();
        assert!(matches!(err, PartitionError::Communication(CommError::Timeout { .. })));
        assert_eq!(
            err.to_string(),
            "communication fault: rank 1: no message from rank 2 after 50 ms"
        );
    }

    #[test]
    fn test_aborted_is_secondary() {
        assert!(PartitionError::from(CommError::Aborted { rank: 0 }).is_secondary());
        assert!(!PartitionError::from(CommError::Disconnected { rank: 0, peer: 1 }).is_secondary());
        assert!(!PartitionError::RankPanicked { rank: 3 }.is_secondary());
    }
}
