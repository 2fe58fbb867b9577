//! Error types for the operator

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("finalizer error: {0}")]
    FinalizerError(#[from] Box<kube::runtime::finalizer::Error<Error>>),

    #[error("validation failed: {0}")]
    ValidationError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("referenced {kind} {namespace}/{name} not found")]
    DependencyNotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("referenced {kind} {namespace}/{name} is not ready: {reason}")]
    DependencyNotReady {
        kind: &'static str,
        namespace: String,
        name: String,
        reason: String,
    },

    #[error("referenced {kind} {namespace}/{name} has the wrong kind: {detail}")]
    WrongKind {
        kind: &'static str,
        namespace: String,
        name: String,
        detail: String,
    },

    #[error("address discovery failed: {0}")]
    DiscoveryError(String),

    #[error("RPC call to {url} failed: {detail}")]
    RpcError { url: String, detail: String },

    #[error("secret {name} is missing key {key}")]
    SecretKeyMissing { name: String, key: String },

    #[error("status update conflict persisted after {attempts} attempts")]
    ConflictError { attempts: u32 },

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl Error {
    /// Whether a short requeue is likely to resolve the error without
    /// operator intervention.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(_)
            | Error::DependencyNotReady { .. }
            | Error::DiscoveryError(_)
            | Error::RpcError { .. }
            | Error::ConflictError { .. } => true,
            Error::FinalizerError(_) => true,
            Error::ValidationError(_)
            | Error::ConfigError(_)
            | Error::DependencyNotFound { .. }
            | Error::WrongKind { .. }
            | Error::SecretKeyMissing { .. }
            | Error::SerializationError(_) => false,
        }
    }
}

impl From<kube::runtime::finalizer::Error<Error>> for Error {
    fn from(e: kube::runtime::finalizer::Error<Error>) -> Self {
        Error::FinalizerError(Box::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_ready_is_retriable() {
        let e = Error::DependencyNotReady {
            kind: "OptimismNetwork",
            namespace: "default".to_string(),
            name: "op-sepolia".to_string(),
            reason: "phase is Pending".to_string(),
        };
        assert!(e.is_retriable());
    }

    #[test]
    fn test_validation_is_not_retriable() {
        let e = Error::ValidationError("chainId must differ from l1ChainId".to_string());
        assert!(!e.is_retriable());
    }

    #[test]
    fn test_secret_key_missing_message_cites_name_and_key() {
        let e = Error::SecretKeyMissing {
            name: "batcher-wallet".to_string(),
            key: "privateKey".to_string(),
        };
        let msg = e.to_string();
        assert!(msg.contains("batcher-wallet"));
        assert!(msg.contains("privateKey"));
    }
}
