//! `shutdown` / `exit` — orderly end of a session.
//!
//! `shutdown` cancels all outstanding received requests and answers `null`;
//! the peer then sends `exit`, which stops the endpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::rpc::{MethodEntry, Part, PartInit, RequestContext, WeakEndpoint};
use crate::types::Result;

pub const SHUTDOWN: &str = "shutdown";
pub const EXIT: &str = "exit";

#[derive(Debug)]
pub struct LifecyclePart {
    endpoint: WeakEndpoint,
    shutdown_requested: AtomicBool,
}

impl LifecyclePart {
    /// Whether the peer has sent `shutdown`.
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    fn shutdown(&self) -> Result<()> {
        let endpoint = self.endpoint.upgrade()?;
        self.shutdown_requested.store(true, Ordering::Release);
        let cancelled = endpoint.cancel_all_received_requests();
        tracing::info!("shutdown requested, cancelled {} requests", cancelled);
        Ok(())
    }

    fn exit(&self) -> Result<()> {
        let endpoint = self.endpoint.upgrade()?;
        if !self.shutdown_requested() {
            tracing::warn!("exit received before shutdown");
        }
        endpoint.shutdown();
        Ok(())
    }
}

impl PartInit for LifecyclePart {
    fn init(endpoint: WeakEndpoint) -> Self {
        Self {
            endpoint,
            shutdown_requested: AtomicBool::new(false),
        }
    }
}

impl Part for LifecyclePart {
    fn methods(self: Arc<Self>) -> Vec<MethodEntry> {
        let on_shutdown = Arc::clone(&self);
        let on_exit = self;
        vec![
            MethodEntry::new(SHUTDOWN, move |_ctx: RequestContext, _: ()| {
                let result = on_shutdown.shutdown();
                async move { result }
            })
            .cancelable(false),
            MethodEntry::new(EXIT, move |_ctx: RequestContext, _: ()| {
                let result = on_exit.exit();
                async move { result }
            })
            .cancelable(false),
        ]
    }
}
