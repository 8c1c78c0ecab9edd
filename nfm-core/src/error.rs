//! Error types for the fault management core

use thiserror::Error;

use crate::snapshot::FaultDomain;

/// Errors raised inside the fault management core
///
/// None of these abort a reconciliation tick: callers log them and fall back
/// to an empty or sentinel value.
#[derive(Debug, Error)]
pub enum FaultError {
    /// Snapshot already holds the maximum number of distinct nodes
    #[error("{domain} snapshot holds {len} nodes (limit {limit}), update for node {node} rejected")]
    CapacityExceeded {
        domain: FaultDomain,
        node: String,
        len: usize,
        limit: usize,
    },

    /// Rank id could not be translated into a pod rank
    #[error("cannot translate rank {rank} with {devices_per_pod} devices per pod: {reason}")]
    InvalidRank {
        rank: String,
        devices_per_pod: usize,
        reason: String,
    },

    /// Malformed JSON payload
    #[error("failed to decode {what}: {source}")]
    Decode {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    /// ConfigMap name does not carry a known fault payload prefix
    #[error("configmap {0} is not a fault configmap")]
    UnknownConfigMap(String),

    /// Expected payload key is missing from a ConfigMap
    #[error("configmap {name} has no {key} entry")]
    MissingKey { name: String, key: String },
}

impl FaultError {
    pub(crate) fn decode(what: impl Into<String>, source: serde_json::Error) -> Self {
        FaultError::Decode {
            what: what.into(),
            source,
        }
    }
}
