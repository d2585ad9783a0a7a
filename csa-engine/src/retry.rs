use std::future::Future;

use csa_core::error::{CsaError, CsaResult};

/// Retries an idempotent, externally-backed operation (parse/extract calls)
/// exactly once on `ExternalServiceError` before surfacing it (spec.md §7
/// "retried at most once by the orchestrator for idempotent stages"). Any
/// other error variant is never retried.
pub async fn retry_once_idempotent<T, F, Fut>(operation: F) -> CsaResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = CsaResult<T>>,
{
    match operation().await {
        Ok(value) => Ok(value),
        Err(CsaError::ExternalServiceError { service, message }) => {
            operation().await.map_err(|retry_err| match retry_err {
                CsaError::ExternalServiceError { service: s2, message: m2 } => {
                    CsaError::ExternalServiceError { service: s2, message: format!("retry failed after initial error \"{message}\" (originally from {service}): {m2}") }
                }
                other => other,
            })
        }
        Err(other) => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_immediately_without_retrying() {
        let calls = AtomicU32::new(0);
        let result = retry_once_idempotent(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, CsaError>(42)
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_exactly_once_on_external_service_error() {
        let calls = AtomicU32::new(0);
        let result = retry_once_idempotent(|| async {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            if attempt == 0 {
                Err(CsaError::ExternalServiceError { service: "parser".to_string(), message: "timeout".to_string() })
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn does_not_retry_non_external_errors() {
        let calls = AtomicU32::new(0);
        let result: CsaResult<i32> = retry_once_idempotent(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CsaError::InvalidInput("bad input".to_string()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn surfaces_failure_after_the_single_retry_also_fails() {
        let calls = AtomicU32::new(0);
        let result: CsaResult<i32> = retry_once_idempotent(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CsaError::ExternalServiceError { service: "parser".to_string(), message: "down".to_string() })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
