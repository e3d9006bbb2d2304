//! Agent error taxonomy.
//!
//! Domain-level classifications, independent of where an error surfaces:
//! local RPC replies carry them as diagnostic strings, the remote path
//! only logs them, startup errors abort the process.

use crate::addr::AddrError;
use crate::codec::CodecError;
use crate::netlink;

/// Result type for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors produced by the agent's own layers.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Configuration is unusable. Fatal at startup.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A VPC or attachment identifier failed validation.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A bus payload failed to decode. Logged; the message is dropped.
    #[error("invalid wire payload: {0}")]
    InvalidWire(String),

    /// A required kernel device is absent.
    #[error("device missing: {0}")]
    DeviceMissing(String),

    /// The VRF device for an attachment is absent or carries no table.
    #[error("vrf missing: {0}")]
    VrfMissing(String),

    /// The kernel refused a netlink operation.
    #[error("netlink: {0}")]
    Netlink(#[from] netlink::Error),

    /// Broker connect/subscribe failure; the caller retries with backoff.
    #[error("broker: {0}")]
    BrokerTransient(String),

    /// Union of partial failures from an aggregate operation.
    #[error("{}", join_errors(.0))]
    Multiple(Vec<AgentError>),
}

impl AgentError {
    /// Collapse a list of failures: none is success, one is itself,
    /// several become a `Multiple`.
    pub fn aggregate(errors: Vec<AgentError>) -> std::result::Result<(), AgentError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.into_iter().next().expect("len checked")),
            _ => Err(AgentError::Multiple(errors)),
        }
    }
}

fn join_errors(errors: &[AgentError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<CodecError> for AgentError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::InvalidIdentifier(msg) => AgentError::InvalidIdentifier(msg),
            CodecError::InvalidBasePrefix(msg) => AgentError::InvalidConfig(msg),
        }
    }
}

impl From<AddrError> for AgentError {
    fn from(err: AddrError) -> Self {
        AgentError::InvalidWire(err.to_string())
    }
}

impl From<prost::DecodeError> for AgentError {
    fn from(err: prost::DecodeError) -> Self {
        AgentError::InvalidWire(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_empty_is_ok() {
        assert!(AgentError::aggregate(Vec::new()).is_ok());
    }

    #[test]
    fn aggregate_single_unwraps() {
        let err = AgentError::aggregate(vec![AgentError::DeviceMissing("eth0".into())])
            .unwrap_err();
        assert!(matches!(err, AgentError::DeviceMissing(_)));
    }

    #[test]
    fn aggregate_many_joins_messages() {
        let err = AgentError::aggregate(vec![
            AgentError::DeviceMissing("G000000001001H".into()),
            AgentError::VrfMissing("G000000001001V".into()),
        ])
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("device missing"));
        assert!(msg.contains("vrf missing"));
        assert!(msg.contains("; "));
    }

    #[test]
    fn codec_errors_map_to_taxonomy() {
        let err: AgentError = CodecError::InvalidIdentifier("x".into()).into();
        assert!(matches!(err, AgentError::InvalidIdentifier(_)));

        let err: AgentError = CodecError::InvalidBasePrefix("x".into()).into();
        assert!(matches!(err, AgentError::InvalidConfig(_)));
    }
}
