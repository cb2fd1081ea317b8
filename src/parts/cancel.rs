//! `$/cancelRequest` — peer-initiated cancellation of received requests.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::rpc::{Endpoint, MethodEntry, Part, PartInit, RequestContext, WeakEndpoint};
use crate::types::{RequestId, Result};

pub const CANCEL_REQUEST: &str = "$/cancelRequest";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelParams {
    pub id: RequestId,
}

#[derive(Debug)]
pub struct CancelRequestPart {
    endpoint: WeakEndpoint,
}

impl CancelRequestPart {
    fn cancel(&self, params: CancelParams) -> Result<()> {
        let endpoint: Endpoint = self.endpoint.upgrade()?;
        if !endpoint.cancel_request(&params.id) {
            tracing::debug!("nothing to cancel for request {}", params.id);
        }
        Ok(())
    }
}

impl PartInit for CancelRequestPart {
    fn init(endpoint: WeakEndpoint) -> Self {
        Self { endpoint }
    }
}

impl Part for CancelRequestPart {
    fn methods(self: Arc<Self>) -> Vec<MethodEntry> {
        vec![MethodEntry::new(
            CANCEL_REQUEST,
            move |_ctx: RequestContext, params: CancelParams| {
                let result = self.cancel(params);
                async move { result }
            },
        )
        .cancelable(false)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::Message;
    use serde_json::json;

    #[tokio::test]
    async fn test_registers_cancel_method() {
        let endpoint = Endpoint::default();
        endpoint.attach::<CancelRequestPart>();
        let entry = endpoint.lookup(CANCEL_REQUEST).unwrap();
        assert!(!entry.is_cancelable());
        assert!(endpoint.part::<CancelRequestPart>().is_some());
    }

    #[tokio::test]
    async fn test_cancel_unknown_id_is_quiet() {
        let endpoint = Endpoint::default();
        endpoint.attach::<CancelRequestPart>();
        endpoint
            .dispatch(Message::notification(CANCEL_REQUEST, Some(json!({"id": 42}))))
            .await;
        assert!(endpoint.outstanding_received().is_empty());
    }

    #[test]
    fn test_params_accept_string_and_number_ids() {
        let p: CancelParams = serde_json::from_value(json!({"id": "abc"})).unwrap();
        assert_eq!(p.id, RequestId::from("abc"));
        let p: CancelParams = serde_json::from_value(json!({"id": 7})).unwrap();
        assert_eq!(p.id, RequestId::Number(7));
    }
}
