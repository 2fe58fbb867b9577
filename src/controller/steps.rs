//! Step pipeline for the reconcile loops
//!
//! Every reconcile is a fixed sequence of steps. A failing step yields a
//! tagged [`StepError`] instead of bailing out through ad-hoc early returns;
//! the reconciler turns it into exactly one condition update, one phase, and
//! one requeue interval. Cheap local checks (validation) run before
//! dependency resolution, which runs before anything with external cost.

use std::time::Duration;

use crate::crd::types::Phase;
use crate::error::Error;

/// Requeue interval after a successful component reconcile
pub const REQUEUE_SUCCESS: Duration = Duration::from_secs(5 * 60);
/// Requeue interval for a converged network (steady-state drift polling)
pub const REQUEUE_SUCCESS_NETWORK: Duration = Duration::from_secs(10 * 60);
/// Requeue after a spec validation failure (needs a user edit)
pub const REQUEUE_INVALID: Duration = Duration::from_secs(5 * 60);
/// Requeue while waiting for a dependency to become ready
pub const REQUEUE_DEPENDENCY_WAIT: Duration = Duration::from_secs(60);
/// Requeue after a missing or wrong-kind reference
pub const REQUEUE_DEPENDENCY_MISSING: Duration = Duration::from_secs(2 * 60);
/// Requeue after an external call (probe, discovery) failed
pub const REQUEUE_EXTERNAL: Duration = Duration::from_secs(3 * 60);
/// Requeue after a child-resource apply failure
pub const REQUEUE_APPLY: Duration = Duration::from_secs(60);
/// Requeue after an unrecoverable synthesis failure; operators may still
/// fix external state, so the resource is never abandoned
pub const REQUEUE_FATAL: Duration = Duration::from_secs(10 * 60);

/// A failed reconcile step, classified per the error taxonomy
#[derive(Debug)]
pub enum StepError {
    /// Spec violates a static invariant; retrying without a spec edit is useless
    Invalid(String),
    /// A referenced resource exists but has not reached the needed phase
    NotReady(String),
    /// A referenced resource is missing
    NotFound(String),
    /// A referenced resource is of an incompatible kind
    WrongKind(String),
    /// A connectivity probe or discovery strategy failed
    External(String),
    /// Writing a child resource or status failed
    Apply(String),
    /// Cannot construct a well-formed child definition from valid input
    Fatal(String),
}

impl StepError {
    /// Phase to report for this failure
    pub fn phase(&self) -> Phase {
        match self {
            // Waiting on a dependency is normal steady-state behavior
            StepError::NotReady(_) => Phase::Pending,
            _ => Phase::Error,
        }
    }

    /// How long to wait before the next reconcile attempt
    pub fn requeue_after(&self) -> Duration {
        match self {
            StepError::Invalid(_) => REQUEUE_INVALID,
            StepError::NotReady(_) => REQUEUE_DEPENDENCY_WAIT,
            StepError::NotFound(_) | StepError::WrongKind(_) => REQUEUE_DEPENDENCY_MISSING,
            StepError::External(_) => REQUEUE_EXTERNAL,
            StepError::Apply(_) => REQUEUE_APPLY,
            StepError::Fatal(_) => REQUEUE_FATAL,
        }
    }

    /// Machine-readable condition reason
    pub fn reason(&self) -> &'static str {
        match self {
            StepError::Invalid(_) => "InvalidSpec",
            StepError::NotReady(_) => "DependencyNotReady",
            StepError::NotFound(_) => "DependencyNotFound",
            StepError::WrongKind(_) => "WrongKind",
            StepError::External(_) => "ExternalUnavailable",
            StepError::Apply(_) => "ApplyFailed",
            StepError::Fatal(_) => "Unrecoverable",
        }
    }

    /// Human-readable condition message
    pub fn message(&self) -> &str {
        match self {
            StepError::Invalid(m)
            | StepError::NotReady(m)
            | StepError::NotFound(m)
            | StepError::WrongKind(m)
            | StepError::External(m)
            | StepError::Apply(m)
            | StepError::Fatal(m) => m,
        }
    }
}

impl From<Error> for StepError {
    fn from(e: Error) -> Self {
        match &e {
            Error::ValidationError(_) | Error::ConfigError(_) => StepError::Invalid(e.to_string()),
            Error::DependencyNotReady { .. } => StepError::NotReady(e.to_string()),
            Error::DependencyNotFound { .. } => StepError::NotFound(e.to_string()),
            Error::WrongKind { .. } => StepError::WrongKind(e.to_string()),
            Error::DiscoveryError(_) | Error::RpcError { .. } => StepError::External(e.to_string()),
            Error::SecretKeyMissing { .. } => StepError::Invalid(e.to_string()),
            Error::KubeError(_) | Error::ConflictError { .. } | Error::FinalizerError(_) => {
                StepError::Apply(e.to_string())
            }
            Error::SerializationError(_) => StepError::Fatal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_spec_verdict() {
        let e = StepError::Invalid("chainId must differ".to_string());
        assert_eq!(e.phase(), Phase::Error);
        assert_eq!(e.requeue_after(), REQUEUE_INVALID);
        assert_eq!(e.reason(), "InvalidSpec");
    }

    #[test]
    fn test_not_ready_is_pending_with_short_requeue() {
        let e = StepError::NotReady("network phase is Pending".to_string());
        assert_eq!(e.phase(), Phase::Pending);
        assert_eq!(e.requeue_after(), REQUEUE_DEPENDENCY_WAIT);
    }

    #[test]
    fn test_not_found_is_error() {
        let e = StepError::NotFound("OptimismNetwork default/missing not found".to_string());
        assert_eq!(e.phase(), Phase::Error);
        assert_eq!(e.requeue_after(), REQUEUE_DEPENDENCY_MISSING);
    }

    #[test]
    fn test_error_classification() {
        let e: StepError = Error::DependencyNotFound {
            kind: "OptimismNetwork",
            namespace: "default".to_string(),
            name: "missing".to_string(),
        }
        .into();
        assert!(matches!(e, StepError::NotFound(_)));

        let e: StepError = Error::RpcError {
            url: "http://l1:8545".to_string(),
            detail: "timeout".to_string(),
        }
        .into();
        assert!(matches!(e, StepError::External(_)));

        let e: StepError = Error::SecretKeyMissing {
            name: "wallet".to_string(),
            key: "privateKey".to_string(),
        }
        .into();
        assert!(matches!(e, StepError::Invalid(_)));
    }

    #[test]
    fn test_fatal_still_requeues() {
        let e = StepError::Fatal("bad child definition".to_string());
        assert!(e.requeue_after() > Duration::ZERO);
    }
}
