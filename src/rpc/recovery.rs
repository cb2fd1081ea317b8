//! Panic recovery for handler execution.
//!
//! A panicking handler must not take down the connection task that runs it:
//! the panic is captured, logged, and converted into an internal error that
//! is reported to the peer like any other handler failure.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::types::{Error, Result};

/// Execute a function with panic recovery.
pub fn with_recovery<F, T>(operation: F, operation_name: &str) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    match catch_unwind(AssertUnwindSafe(operation)) {
        Ok(result) => result,
        Err(panic_payload) => Err(panic_error(&*panic_payload, operation_name)),
    }
}

/// Await a future with panic recovery.
pub async fn with_recovery_async<Fut, T>(future: Fut, operation_name: &str) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(panic_payload) => Err(panic_error(&*panic_payload, operation_name)),
    }
}

/// Log a captured panic and turn it into an internal error.
pub(crate) fn panic_error(payload: &(dyn Any + Send), operation_name: &str) -> Error {
    let panic_msg = extract_panic_message(payload);
    tracing::error!(
        "panic_recovered: operation={}, panic={}",
        operation_name,
        panic_msg
    );
    Error::internal(format!("Panic in {}: {}", operation_name, panic_msg))
}

/// Extract panic message from panic payload.
fn extract_panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic (no message)".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_recovery_passes_through() {
        let result = with_recovery(|| Ok(5), "ok_op");
        assert_eq!(result.unwrap(), 5);

        let result: Result<()> = with_recovery(|| Err(Error::invalid_params("x")), "err_op");
        assert!(matches!(result, Err(Error::InvalidParams(_))));
    }

    #[test]
    #[allow(clippy::panic)]
    fn test_with_recovery_catches_panic() {
        let result: Result<()> = with_recovery(|| panic!("boom"), "panicky");
        match result {
            Err(Error::Internal(msg)) => assert_eq!(msg, "Panic in panicky: boom"),
            other => unreachable!("expected internal error, got {:?}", other),
        }
    }

    #[tokio::test]
    #[allow(clippy::panic)]
    async fn test_with_recovery_async_catches_panic() {
        let fut = async {
            tokio::task::yield_now().await;
            let n: u32 = "x".len() as u32;
            if n == 1 {
                panic!("async boom {}", n);
            }
            Ok(n)
        };
        let result = with_recovery_async(fut, "async_op").await;
        match result {
            Err(Error::Internal(msg)) => assert_eq!(msg, "Panic in async_op: async boom 1"),
            other => unreachable!("expected internal error, got {:?}", other),
        }
    }
}
