//! Bounded retry for optimistic-concurrency conflicts
//!
//! Status is the only mutable shared surface of a managed resource. Writes
//! go through a read-modify-write cycle against the latest version; a 409
//! from the API server restarts the cycle up to a small bound instead of
//! failing the whole reconcile.

use std::future::Future;

use kube::api::{Api, PostParams};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Maximum read-modify-write cycles before surfacing the conflict
pub const MAX_CONFLICT_RETRIES: u32 = 3;

/// Run `f` until it succeeds, retrying only on HTTP 409 up to `max_attempts`.
pub async fn retry_on_conflict<T, F, Fut>(max_attempts: u32, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Err(Error::KubeError(kube::Error::Api(ae))) if ae.code == 409 => {
                if attempt >= max_attempts {
                    return Err(Error::ConflictError { attempts: attempt });
                }
                debug!(attempt, "write conflict, retrying with fresh read");
            }
            other => return other,
        }
    }
}

/// Read the latest object, apply `mutate` to it, and replace its status
/// subresource, retrying the whole cycle on version conflicts.
///
/// `mutate` must only touch fields this controller owns; everything else is
/// carried over from the fresh read.
pub async fn update_status_with_retry<K, F>(api: &Api<K>, name: &str, mutate: F) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Serialize + std::fmt::Debug,
    F: Fn(&mut K),
{
    retry_on_conflict(MAX_CONFLICT_RETRIES, || async {
        let mut latest = api.get(name).await.map_err(Error::KubeError)?;
        mutate(&mut latest);
        let data = serde_json::to_vec(&latest)?;
        api.replace_status(name, &PostParams::default(), data)
            .await
            .map_err(Error::KubeError)?;
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn conflict() -> Error {
        Error::KubeError(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "the object has been modified".to_string(),
            reason: "Conflict".to_string(),
            code: 409,
        }))
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_conflict() {
        let calls = AtomicU32::new(0);
        let result = retry_on_conflict(3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(conflict())
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_bounded_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_on_conflict(3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(conflict()) }
        })
        .await;
        assert!(matches!(result, Err(Error::ConflictError { attempts: 3 })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_conflict_errors_bubble_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_on_conflict(3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::ValidationError("bad".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(Error::ValidationError(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
