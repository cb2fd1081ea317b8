//! JSON-RPC endpoint — inbound dispatch, outbound calls, cancellation.
//!
//! One `Endpoint` drives one connection:
//! ```text
//!   reader ─► FrameCodec ─► decode ─► JoinSet task per message ─► handler
//!                                                                   │
//!   writer ◄─ FrameCodec ◄─ writer task ◄─ mpsc ◄── send_* ◄────────┘
//! ```
//! Every inbound message runs in its own task, so a slow handler never holds
//! up unrelated messages. Everything written goes through the single writer
//! task, so frames never interleave on the wire.
//!
//! Requests we send are tracked in the sent table until the peer replies;
//! requests we receive are tracked in the received table until their handler
//! reaches a terminal state.

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::future::IntoFuture;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::rpc::codec::{body_text, Frame, FrameCodec, MAX_HEADER_BYTES};
use crate::rpc::message::{
    decode_body, ErrorObject, ErrorResponse, Message, Notification, Request, Response,
};
use crate::rpc::params::from_result;
use crate::rpc::part::{AttachedPart, Part, PartInit, PartSet};
use crate::rpc::recovery::{with_recovery, with_recovery_async};
use crate::rpc::registry::{Handler, MethodEntry, MethodRegistry};
use crate::types::{Error, RequestId, Result, RpcConfig};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Request tables
// =============================================================================

/// Lifecycle of a received request while it is tracked.
///
/// Terminal states (completed, failed, cancelled) are never stored: the
/// entry is removed as soon as the handler reaches one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Dispatched, waiting for execution (e.g. for a worker permit).
    Pending,
    /// Handler is executing.
    Running,
}

#[derive(Debug)]
struct ReceivedRequest {
    method: String,
    state: RequestState,
    token: CancellationToken,
    cancelable: bool,
}

#[derive(Debug)]
struct SentRequest {
    method: String,
    tx: oneshot::Sender<Result<Value>>,
}

#[derive(Debug, Default)]
struct SentTable {
    requests: HashMap<RequestId, SentRequest>,
    /// Set at teardown; no new requests are accepted afterwards.
    closed: bool,
}

#[derive(Debug)]
enum Outbound {
    Frame(Bytes),
    Close,
}

// =============================================================================
// Endpoint
// =============================================================================

struct Inner {
    config: RpcConfig,
    registry: MethodRegistry,
    parts: PartSet,
    next_id: AtomicI64,
    sent: Mutex<SentTable>,
    received: Mutex<HashMap<RequestId, ReceivedRequest>>,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Outbound>>>,
    workers: Arc<Semaphore>,
    shutdown: CancellationToken,
}

/// A JSON-RPC endpoint. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<Inner>,
}

/// Non-owning handle to an [`Endpoint`], held by parts.
#[derive(Clone)]
pub struct WeakEndpoint {
    inner: Weak<Inner>,
}

impl WeakEndpoint {
    /// Get the endpoint back. Fails once the endpoint has been dropped.
    pub fn upgrade(&self) -> Result<Endpoint> {
        self.inner
            .upgrade()
            .map(|inner| Endpoint { inner })
            .ok_or_else(|| Error::internal("endpoint is gone"))
    }
}

impl fmt::Debug for WeakEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakEndpoint")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("methods", &self.inner.registry.len())
            .field("parts", &self.inner.parts.len())
            .field("outstanding_sent", &self.outstanding_sent())
            .field("outstanding_received", &lock(&self.inner.received).len())
            .finish()
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(RpcConfig::default())
    }
}

impl Endpoint {
    pub fn new(config: RpcConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let workers = Arc::new(Semaphore::new(config.worker_threads.max(1)));
        Self {
            inner: Arc::new(Inner {
                config,
                registry: MethodRegistry::new(),
                parts: PartSet::default(),
                next_id: AtomicI64::new(1),
                sent: Mutex::new(SentTable::default()),
                received: Mutex::new(HashMap::new()),
                outbound_tx,
                outbound_rx: Mutex::new(Some(outbound_rx)),
                workers,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &RpcConfig {
        &self.inner.config
    }

    pub fn downgrade(&self) -> WeakEndpoint {
        WeakEndpoint {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // =========================================================================
    // Methods and parts
    // =========================================================================

    /// Register a method on the endpoint itself. Last write wins.
    pub fn register(&self, entry: MethodEntry) {
        tracing::debug!("register method {}", entry.name());
        self.inner.registry.register(entry);
    }

    pub fn unregister(&self, name: &str) -> Option<MethodEntry> {
        self.ensure_parts();
        self.inner.registry.unregister(name)
    }

    /// Resolve a method name against endpoint and part registrations.
    pub fn lookup(&self, name: &str) -> Option<MethodEntry> {
        self.ensure_parts();
        self.inner.registry.lookup(name)
    }

    /// Sorted names of every method currently served.
    pub fn methods(&self) -> Vec<String> {
        self.ensure_parts();
        self.inner.registry.names()
    }

    pub fn registry(&self) -> &MethodRegistry {
        self.ensure_parts();
        &self.inner.registry
    }

    /// Construct a part against this endpoint and attach its methods.
    ///
    /// Attaching a second part of the same type replaces the first.
    pub fn attach_with<P, F>(&self, build: F) -> Arc<P>
    where
        P: Part,
        F: FnOnce(WeakEndpoint) -> P,
    {
        let part = Arc::new(build(self.downgrade()));
        self.install(AttachedPart::new(Arc::clone(&part)));
        part
    }

    /// Attach a part that can build itself from the endpoint.
    pub fn attach<P: PartInit>(&self) -> Arc<P> {
        self.attach_with(P::init)
    }

    /// Declare a part type; it is constructed on first registry access.
    pub fn declare_part<P: PartInit>(&self) {
        self.inner.parts.declare::<P>();
        self.inner.registry.invalidate();
    }

    /// Typed accessor for an attached (or declared) part.
    pub fn part<P: Part>(&self) -> Option<Arc<P>> {
        self.ensure_parts();
        self.inner
            .parts
            .get(TypeId::of::<P>())
            .and_then(|p| p.downcast::<P>().ok())
    }

    /// Detach a part and drop its methods from the registry.
    pub fn detach_part<P: Part>(&self) -> Option<Arc<P>> {
        self.ensure_parts();
        let type_id = TypeId::of::<P>();
        self.inner.registry.remove_part(type_id);
        self.inner
            .parts
            .remove(type_id)
            .and_then(|p| p.downcast::<P>().ok())
    }

    fn install(&self, attached: AttachedPart) {
        tracing::debug!(
            "attach part {} ({} methods)",
            attached.type_name,
            attached.methods.len()
        );
        self.inner
            .registry
            .add_part(attached.type_id, attached.type_name, attached.methods);
        self.inner.parts.insert(attached.type_id, attached.instance);
    }

    /// Build any declared parts that have not been constructed yet.
    fn ensure_parts(&self) {
        for factory in self.inner.parts.take_declared() {
            let attached = factory(self.downgrade());
            if !self.inner.parts.contains(attached.type_id) {
                self.install(attached);
            }
        }
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Queue a message for the writer task.
    pub fn send_message(&self, message: &Message) -> Result<()> {
        let body = message.encode()?;
        if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!("JSON send: {}", String::from_utf8_lossy(&body));
        }
        self.inner
            .outbound_tx
            .send(Outbound::Frame(Bytes::from(body)))
            .map_err(|_| Error::connection_closed("writer has stopped"))
    }

    pub fn send_notification(&self, method: &str, params: impl Serialize) -> Result<()> {
        let params = to_params(params)?;
        self.send_message(&Message::notification(method, params))
    }

    pub fn send_response(&self, id: RequestId, result: impl Serialize) -> Result<()> {
        let result = serde_json::to_value(result)?;
        self.send_message(&Message::response(id, result))
    }

    pub fn send_error(&self, id: Option<RequestId>, error: ErrorObject) -> Result<()> {
        self.send_message(&Message::error(id, error))
    }

    /// Send a request; the returned handle resolves with the peer's reply.
    pub fn send_request<R: DeserializeOwned>(
        &self,
        method: &str,
        params: impl Serialize,
    ) -> Result<PendingResponse<R>> {
        let params = to_params(params)?;
        let (tx, rx) = oneshot::channel();

        let id = {
            let mut sent = lock(&self.inner.sent);
            if sent.closed {
                return Err(Error::connection_closed(format!(
                    "cannot send {}: connection is closed",
                    method
                )));
            }
            if sent.requests.len() >= self.inner.config.max_pending_requests {
                return Err(Error::quota_exceeded(format!(
                    "{} requests already awaiting a reply",
                    sent.requests.len()
                )));
            }
            let mut id = RequestId::Number(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
            while sent.requests.contains_key(&id) {
                id = RequestId::Number(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
            }
            sent.requests.insert(
                id.clone(),
                SentRequest {
                    method: method.to_string(),
                    tx,
                },
            );
            id
        };

        let guard = SentGuard {
            id: id.clone(),
            endpoint: self.downgrade(),
        };
        self.send_message(&Message::request(id.clone(), method, params))?;

        Ok(PendingResponse {
            id,
            rx,
            timeout: self.inner.config.request_timeout,
            _guard: guard,
            _result: PhantomData,
        })
    }

    /// Number of sent requests still waiting for a reply.
    pub fn outstanding_sent(&self) -> usize {
        lock(&self.inner.sent).requests.len()
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    /// Request cooperative cancellation of a received request.
    ///
    /// Returns `false` (and does nothing) if the request is unknown, already
    /// terminal, already cancelled, or not cancelable.
    pub fn cancel_request(&self, id: &RequestId) -> bool {
        let received = lock(&self.inner.received);
        match received.get(id) {
            Some(entry) if entry.cancelable && !entry.token.is_cancelled() => {
                tracing::debug!("cancel request {} ({})", id, entry.method);
                entry.token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Cancel every outstanding cancelable received request.
    pub fn cancel_all_received_requests(&self) -> usize {
        let received = lock(&self.inner.received);
        let mut cancelled = 0;
        for entry in received.values() {
            if entry.cancelable && !entry.token.is_cancelled() {
                entry.token.cancel();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            tracing::debug!("cancelled {} received requests", cancelled);
        }
        cancelled
    }

    /// Received requests that have not reached a terminal state, by id.
    pub fn outstanding_received(&self) -> Vec<(RequestId, RequestState)> {
        let mut entries: Vec<(RequestId, RequestState)> = lock(&self.inner.received)
            .iter()
            .map(|(id, entry)| (id.clone(), entry.state))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Stop the inbound loop; `serve` then tears the connection down.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    // =========================================================================
    // Serving
    // =========================================================================

    /// Drive the connection until the peer closes the stream, a transport
    /// error occurs, or [`Endpoint::shutdown`] is called.
    ///
    /// An endpoint serves exactly one connection.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let outbound_rx = lock(&self.inner.outbound_rx)
            .take()
            .ok_or_else(|| Error::internal("endpoint is already serving a connection"))?;
        self.ensure_parts();

        let writer_task = tokio::spawn(write_loop(
            writer,
            outbound_rx,
            self.inner.config.write_timeout,
            self.inner.shutdown.clone(),
        ));

        let mut frames = FramedRead::new(reader, FrameCodec::new(self.inner.config.max_frame_bytes));
        let mut tasks: JoinSet<()> = JoinSet::new();

        let result = loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => {
                    tracing::debug!("endpoint shutdown requested");
                    break Ok(());
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("message task failed: {}", e);
                    }
                }
                frame = frames.next() => match frame {
                    Some(Ok(frame)) => self.handle_frame(frame, &mut tasks),
                    Some(Err(e)) => {
                        tracing::warn!("read error, closing connection: {}", e);
                        break Err(Error::Io(e));
                    }
                    None => {
                        tracing::debug!("peer closed the stream");
                        break Ok(());
                    }
                },
            }
        };

        self.teardown(tasks).await;

        let _ = self.inner.outbound_tx.send(Outbound::Close);
        match writer_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("writer stopped with error: {}", e),
            Err(e) => tracing::error!("writer task failed: {}", e),
        }

        result
    }

    fn handle_frame(&self, frame: Frame, tasks: &mut JoinSet<()>) {
        let (body, charset) = match frame {
            Frame::Message { body, charset } => (body, charset),
            Frame::Oversized { length } => {
                tracing::warn!("discarding oversized frame of {} bytes", length);
                self.reply_error(
                    None,
                    Error::parse(format!(
                        "frame of {} bytes exceeds limit of {} bytes",
                        length, self.inner.config.max_frame_bytes
                    )),
                );
                return;
            }
            Frame::Unframed { skipped } => {
                tracing::warn!("dropped {} bytes without a header terminator", skipped);
                self.reply_error(
                    None,
                    Error::parse(format!(
                        "no header terminator within {} bytes",
                        MAX_HEADER_BYTES
                    )),
                );
                return;
            }
        };

        let messages = body_text(&body, &charset).and_then(|text| {
            tracing::trace!("JSON received: {}", text);
            decode_body(text)
        });

        match messages {
            Ok(messages) => {
                for message in messages {
                    match message {
                        Ok(message) => {
                            let endpoint = self.clone();
                            tasks.spawn(async move { endpoint.dispatch(message).await });
                        }
                        Err(e) => {
                            tracing::warn!("rejected message: {}", e);
                            self.reply_error(None, e);
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!("undecodable body: {}", e);
                self.reply_error(None, e);
            }
        }
    }

    /// Handle one decoded message.
    pub(crate) async fn dispatch(&self, message: Message) {
        match message {
            Message::Request(request) => self.handle_request(request).await,
            Message::Notification(notification) => self.handle_notification(notification).await,
            Message::Response(response) => self.handle_response(response),
            Message::Error(error) => self.handle_error(error),
        }
    }

    async fn handle_request(&self, request: Request) {
        let Request { id, method, params } = request;

        let Some(entry) = self.lookup(&method) else {
            tracing::debug!("unknown method {} for request {}", method, id);
            self.reply_error(Some(id), Error::method_not_found(method));
            return;
        };

        let token = CancellationToken::new();
        {
            let mut received = lock(&self.inner.received);
            if received.contains_key(&id) {
                drop(received);
                tracing::warn!("request id {} is already in flight", id);
                self.reply_error(
                    Some(id.clone()),
                    Error::invalid_request(format!("request id {} is already in flight", id)),
                );
                return;
            }
            received.insert(
                id.clone(),
                ReceivedRequest {
                    method: method.clone(),
                    state: RequestState::Pending,
                    token: token.clone(),
                    cancelable: entry.is_cancelable(),
                },
            );
        }

        let ctx = RequestContext {
            endpoint: self.clone(),
            id: Some(id.clone()),
            method: method.clone(),
            token: token.clone(),
        };

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::cancelled(format!("{} ({})", method, id))),
            result = self.execute(&entry, Some(&id), ctx, params) => result,
        };

        // a cancel accepted before removal wins over a finished result
        let outcome = {
            let mut received = lock(&self.inner.received);
            received.remove(&id);
            match outcome {
                _ if token.is_cancelled() => {
                    Err(Error::cancelled(format!("{} ({})", method, id)))
                }
                other => other,
            }
        };

        let sent = match outcome {
            Ok(result) => self.send_response(id.clone(), result),
            Err(e) => {
                match &e {
                    Error::Cancelled(_) => tracing::debug!("request {} {} cancelled", method, id),
                    Error::Rpc(_) | Error::InvalidParams(_) => {
                        tracing::debug!("request {} {} failed: {}", method, id, e)
                    }
                    _ => tracing::error!("request {} {} failed: {}", method, id, e),
                }
                self.send_error(Some(id.clone()), e.to_error_object())
            }
        };
        if let Err(e) = sent {
            tracing::debug!("could not reply to request {}: {}", id, e);
        }
    }

    async fn handle_notification(&self, notification: Notification) {
        let Notification { method, params } = notification;

        let Some(entry) = self.lookup(&method) else {
            if method.starts_with("$/") {
                tracing::debug!("ignoring optional notification {}", method);
            } else {
                tracing::warn!("Unknown method: {}", method);
            }
            return;
        };

        let ctx = RequestContext {
            endpoint: self.clone(),
            id: None,
            method: method.clone(),
            token: CancellationToken::new(),
        };

        if let Err(e) = self.execute(&entry, None, ctx, params).await {
            tracing::error!("notification {} failed: {}", method, e);
        }
    }

    fn handle_response(&self, response: Response) {
        let Response { id, result } = response;
        let entry = lock(&self.inner.sent).requests.remove(&id);
        match entry {
            Some(entry) => {
                tracing::debug!("response for {} ({})", id, entry.method);
                // receiver may have been dropped; nothing to resolve then
                let _ = entry.tx.send(Ok(result));
            }
            None => {
                tracing::warn!(
                    "Invalid response. Could not find id {} in request list.",
                    id
                );
            }
        }
    }

    fn handle_error(&self, response: ErrorResponse) {
        let ErrorResponse { id, error } = response;
        let entry = id
            .as_ref()
            .and_then(|id| lock(&self.inner.sent).requests.remove(id));
        match (entry, id) {
            (Some(entry), Some(id)) => {
                tracing::debug!(
                    "error reply for {} ({}): {} {}",
                    id,
                    entry.method,
                    error.code,
                    error.message
                );
                let _ = entry.tx.send(Err(Error::Rpc(error)));
            }
            (_, id) => {
                tracing::warn!(
                    "peer reported error {} \"{}\" for unknown request {:?}",
                    error.code,
                    error.message,
                    id
                );
            }
        }
    }

    /// Run a handler inline or on the worker pool.
    async fn execute(
        &self,
        entry: &MethodEntry,
        id: Option<&RequestId>,
        ctx: RequestContext,
        params: Option<Value>,
    ) -> Result<Value> {
        match entry.handler() {
            Handler::Async(handler) => {
                self.mark_running(id);
                let handler = Arc::clone(handler);
                with_recovery_async(async move { handler(ctx, params).await }, entry.name()).await
            }
            Handler::Blocking(handler) => {
                let permit = Arc::clone(&self.inner.workers)
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::internal("worker pool is closed"))?;
                self.mark_running(id);

                let handler = Arc::clone(handler);
                let name = entry.name().to_string();
                let join = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    with_recovery(|| handler(ctx, params), &name)
                });
                join.await
                    .map_err(|e| Error::internal(format!("worker task failed: {}", e)))?
            }
        }
    }

    fn mark_running(&self, id: Option<&RequestId>) {
        if let Some(id) = id {
            if let Some(entry) = lock(&self.inner.received).get_mut(id) {
                entry.state = RequestState::Running;
            }
        }
    }

    fn reply_error(&self, id: Option<RequestId>, error: Error) {
        if let Err(e) = self.send_error(id, error.to_error_object()) {
            tracing::debug!("could not send error reply: {}", e);
        }
    }

    /// Fail outstanding sent requests and wind down received ones.
    async fn teardown(&self, mut tasks: JoinSet<()>) {
        let orphaned: Vec<(RequestId, SentRequest)> = {
            let mut sent = lock(&self.inner.sent);
            sent.closed = true;
            sent.requests.drain().collect()
        };
        if !orphaned.is_empty() {
            tracing::debug!("failing {} unanswered requests", orphaned.len());
        }
        for (id, entry) in orphaned {
            let _ = entry.tx.send(Err(Error::connection_closed(format!(
                "no reply to {} ({}) before the connection closed",
                id, entry.method
            ))));
        }

        self.cancel_all_received_requests();

        let grace = self.inner.config.shutdown_grace;
        let drained = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                "aborting {} handlers still running after {:?}",
                tasks.len(),
                grace
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        lock(&self.inner.received).clear();
    }
}

fn to_params(params: impl Serialize) -> Result<Option<Value>> {
    match serde_json::to_value(params)? {
        Value::Null => Ok(None),
        v => Ok(Some(v)),
    }
}

async fn write_loop<W>(
    writer: W,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    write_timeout: Duration,
    shutdown: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(writer, FrameCodec::default());

    while let Some(outbound) = rx.recv().await {
        let body = match outbound {
            Outbound::Frame(body) => body,
            Outbound::Close => break,
        };
        match tokio::time::timeout(write_timeout, sink.send(body)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                shutdown.cancel();
                return Err(Error::Io(e));
            }
            Err(_) => {
                tracing::warn!(
                    "Write timeout ({}s), dropping connection",
                    write_timeout.as_secs()
                );
                shutdown.cancel();
                return Err(Error::timeout("write timeout"));
            }
        }
    }

    sink.close().await?;
    Ok(())
}

// =============================================================================
// Pending replies
// =============================================================================

/// Removes a sent request from the table when its handle goes away.
struct SentGuard {
    id: RequestId,
    endpoint: WeakEndpoint,
}

impl Drop for SentGuard {
    fn drop(&mut self) {
        if let Ok(endpoint) = self.endpoint.upgrade() {
            lock(&endpoint.inner.sent).requests.remove(&self.id);
        }
    }
}

/// Handle to the reply of a sent request.
///
/// Await it (or call [`PendingResponse::wait`]) to get the result converted
/// to `R`. Dropping the handle forgets the request.
pub struct PendingResponse<R> {
    id: RequestId,
    rx: oneshot::Receiver<Result<Value>>,
    timeout: Option<Duration>,
    _guard: SentGuard,
    _result: PhantomData<fn() -> R>,
}

impl<R> fmt::Debug for PendingResponse<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResponse")
            .field("id", &self.id)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<R: DeserializeOwned> PendingResponse<R> {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Wait for the reply.
    ///
    /// Resolves with the converted result, the peer's error, a timeout (if
    /// configured; the request is then forgotten), or connection-closed.
    pub async fn wait(self) -> Result<R> {
        let PendingResponse {
            id,
            rx,
            timeout,
            _guard,
            ..
        } = self;

        let reply = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    return Err(Error::timeout(format!(
                        "no reply to request {} within {:?}",
                        id, limit
                    )))
                }
            },
            None => rx.await,
        };

        let value = reply.map_err(|_| {
            Error::connection_closed(format!("request {} was dropped without a reply", id))
        })??;
        from_result(value)
    }
}

impl<R: DeserializeOwned + Send + 'static> IntoFuture for PendingResponse<R> {
    type Output = Result<R>;
    type IntoFuture = BoxFuture<'static, Result<R>>;

    fn into_future(self) -> Self::IntoFuture {
        self.wait().boxed()
    }
}

// =============================================================================
// Request context
// =============================================================================

/// What a handler gets besides its params.
#[derive(Clone)]
pub struct RequestContext {
    endpoint: Endpoint,
    id: Option<RequestId>,
    method: String,
    token: CancellationToken,
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

impl RequestContext {
    /// The endpoint that dispatched this call.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Request id; `None` for notifications.
    pub fn id(&self) -> Option<&RequestId> {
        self.id.as_ref()
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes when cancellation of this request is requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// `Err(Cancelled)` once cancellation was requested. Meant for safe
    /// points inside threaded handlers.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::cancelled(self.method.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tracing_test::traced_test;

    #[tokio::test]
    async fn test_send_request_ids_increase() {
        let endpoint = Endpoint::default();
        let a = endpoint.send_request::<Value>("a", ()).unwrap();
        let b = endpoint.send_request::<Value>("b", json!({"x": 1})).unwrap();
        assert_eq!(a.id(), &RequestId::Number(1));
        assert_eq!(b.id(), &RequestId::Number(2));
        assert_eq!(endpoint.outstanding_sent(), 2);

        drop(a);
        assert_eq!(endpoint.outstanding_sent(), 1);
    }

    #[tokio::test]
    async fn test_response_resolves_pending() {
        let endpoint = Endpoint::default();
        let pending = endpoint.send_request::<String>("ask", ()).unwrap();
        let id = pending.id().clone();

        endpoint.dispatch(Message::response(id, json!("answer"))).await;
        assert_eq!(pending.await.unwrap(), "answer");
        assert_eq!(endpoint.outstanding_sent(), 0);
    }

    #[tokio::test]
    async fn test_error_reply_rejects_pending() {
        let endpoint = Endpoint::default();
        let pending = endpoint.send_request::<Value>("ask", ()).unwrap();
        let id = pending.id().clone();

        endpoint
            .dispatch(Message::error(Some(id), ErrorObject::new(-32001, "nope")))
            .await;
        match pending.await {
            Err(Error::Rpc(obj)) => assert_eq!(obj.code, -32001),
            other => unreachable!("expected rpc error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_response_id_is_ignored() {
        let endpoint = Endpoint::default();
        endpoint.dispatch(Message::response(99i64, json!(1))).await;
        endpoint
            .dispatch(Message::error(None, ErrorObject::new(-32700, "bad")))
            .await;
        assert_eq!(endpoint.outstanding_sent(), 0);
    }

    #[tokio::test]
    async fn test_result_conversion_failure() {
        let endpoint = Endpoint::default();
        let pending = endpoint.send_request::<u32>("ask", ()).unwrap();
        let id = pending.id().clone();
        endpoint.dispatch(Message::response(id, json!("not a number"))).await;
        assert!(matches!(pending.await, Err(Error::Internal(_))));
    }

    #[tokio::test]
    async fn test_max_pending_requests() {
        let config = RpcConfig {
            max_pending_requests: 1,
            ..RpcConfig::default()
        };
        let endpoint = Endpoint::new(config);
        let _first = endpoint.send_request::<Value>("a", ()).unwrap();
        let err = endpoint.send_request::<Value>("b", ()).unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_evicts_entry() {
        let config = RpcConfig {
            request_timeout: Some(Duration::from_millis(50)),
            ..RpcConfig::default()
        };
        let endpoint = Endpoint::new(config);
        let pending = endpoint.send_request::<Value>("slow", ()).unwrap();
        assert!(matches!(pending.await, Err(Error::Timeout(_))));
        assert_eq!(endpoint.outstanding_sent(), 0);
    }

    #[tokio::test]
    async fn test_cancel_unknown_request_is_noop() {
        let endpoint = Endpoint::default();
        assert!(!endpoint.cancel_request(&RequestId::Number(1)));
        assert_eq!(endpoint.cancel_all_received_requests(), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_notification_failure_is_logged() {
        let endpoint = Endpoint::default();
        endpoint.register(MethodEntry::new("fail", |_ctx: RequestContext, _: ()| async {
            Err::<(), _>(Error::internal("disk full"))
        }));
        endpoint.dispatch(Message::notification("fail", None)).await;
        assert!(logs_contain("notification fail failed"));
        assert!(logs_contain("disk full"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unknown_response_is_logged() {
        let endpoint = Endpoint::default();
        endpoint.dispatch(Message::response(77i64, json!(null))).await;
        assert!(logs_contain("Could not find id 77"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unknown_notification_is_logged() {
        let endpoint = Endpoint::default();
        endpoint.dispatch(Message::notification("textDocument/didSave", None)).await;
        assert!(logs_contain("Unknown method: textDocument/didSave"));
    }

    #[test]
    fn test_weak_endpoint_after_drop() {
        let endpoint = Endpoint::default();
        let weak = endpoint.downgrade();
        assert!(weak.upgrade().is_ok());
        drop(endpoint);
        assert!(matches!(weak.upgrade(), Err(Error::Internal(_))));
    }
}
