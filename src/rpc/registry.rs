//! Method registry — name → handler table aggregated from every source.
//!
//! Sources are the endpoint itself (methods registered directly) and each
//! attached part. Every registration carries a sequence number; the
//! aggregate is built by applying registrations in sequence order, so the
//! most recent registration of a name wins no matter which source made it.
//!
//! The aggregate is memoized as an immutable snapshot. Lookups read the
//! snapshot without locking; any structural change drops it and the next
//! lookup rebuilds it.

use arc_swap::ArcSwapOption;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::rpc::endpoint::RequestContext;
use crate::rpc::params::{from_params, to_result};
use crate::types::Result;

/// Future returned by async handlers.
pub type HandlerFuture = BoxFuture<'static, Result<Value>>;

/// Type-erased async handler.
pub type AsyncHandlerFn = dyn Fn(RequestContext, Option<Value>) -> HandlerFuture + Send + Sync;

/// Type-erased blocking handler, run on the worker pool.
pub type BlockingHandlerFn = dyn Fn(RequestContext, Option<Value>) -> Result<Value> + Send + Sync;

/// How a method is executed.
#[derive(Clone)]
pub enum Handler {
    /// Runs on the async runtime inside the message's task.
    Async(Arc<AsyncHandlerFn>),
    /// Runs on the bounded blocking worker pool.
    Blocking(Arc<BlockingHandlerFn>),
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Async(_) => f.write_str("Handler::Async"),
            Handler::Blocking(_) => f.write_str("Handler::Blocking"),
        }
    }
}

/// A registered method: name, handler, declared parameter type, cancelability.
#[derive(Debug, Clone)]
pub struct MethodEntry {
    name: String,
    handler: Handler,
    param_type: &'static str,
    cancelable: bool,
}

impl MethodEntry {
    /// Async handler taking typed params `P` and returning a serializable `R`.
    pub fn new<P, R, F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(RequestContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased = move |ctx: RequestContext, params: Option<Value>| -> HandlerFuture {
            let handler = Arc::clone(&handler);
            async move {
                let params = from_params::<P>(params)?;
                let result = handler(ctx, params).await?;
                to_result(result)
            }
            .boxed()
        };

        Self {
            name: name.into(),
            handler: Handler::Async(Arc::new(erased)),
            param_type: std::any::type_name::<P>(),
            cancelable: true,
        }
    }

    /// Blocking handler executed on the worker pool ("threaded").
    pub fn threaded<P, R, F>(name: impl Into<String>, handler: F) -> Self
    where
        P: DeserializeOwned + 'static,
        R: Serialize + 'static,
        F: Fn(RequestContext, P) -> Result<R> + Send + Sync + 'static,
    {
        let erased = move |ctx: RequestContext, params: Option<Value>| -> Result<Value> {
            let params = from_params::<P>(params)?;
            to_result(handler(ctx, params)?)
        };

        Self {
            name: name.into(),
            handler: Handler::Blocking(Arc::new(erased)),
            param_type: std::any::type_name::<P>(),
            cancelable: true,
        }
    }

    /// Set whether the method may be cancelled (defaults to `true`).
    pub fn cancelable(mut self, cancelable: bool) -> Self {
        self.cancelable = cancelable;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Rust type name of the declared parameter type.
    pub fn param_type(&self) -> &'static str {
        self.param_type
    }

    pub fn is_cancelable(&self) -> bool {
        self.cancelable
    }

    pub fn is_threaded(&self) -> bool {
        matches!(self.handler, Handler::Blocking(_))
    }
}

#[derive(Debug)]
struct Registration {
    seq: u64,
    entry: MethodEntry,
}

#[derive(Debug)]
struct PartLayer {
    type_id: TypeId,
    type_name: &'static str,
    methods: Vec<Registration>,
}

#[derive(Debug, Default)]
struct Sources {
    own: HashMap<String, Registration>,
    parts: Vec<PartLayer>,
    next_seq: u64,
}

impl Sources {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn aggregate(&self) -> HashMap<String, MethodEntry> {
        let mut all: Vec<&Registration> = self
            .own
            .values()
            .chain(self.parts.iter().flat_map(|p| p.methods.iter()))
            .collect();
        all.sort_by_key(|r| r.seq);

        let mut methods = HashMap::with_capacity(all.len());
        for reg in all {
            methods.insert(reg.entry.name.clone(), reg.entry.clone());
        }
        methods
    }
}

/// Aggregated, memoized method table.
#[derive(Debug, Default)]
pub struct MethodRegistry {
    sources: Mutex<Sources>,
    snapshot: ArcSwapOption<HashMap<String, MethodEntry>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method on the endpoint itself. Last write wins.
    pub fn register(&self, entry: MethodEntry) {
        let mut sources = lock(&self.sources);
        let seq = sources.next_seq();
        sources
            .own
            .insert(entry.name.clone(), Registration { seq, entry });
        self.snapshot.store(None);
    }

    /// Remove `name` from every source. Returns the entry that was in effect.
    pub fn unregister(&self, name: &str) -> Option<MethodEntry> {
        let previous = self.lookup(name);
        let mut sources = lock(&self.sources);
        sources.own.remove(name);
        for layer in &mut sources.parts {
            layer.methods.retain(|r| r.entry.name != name);
        }
        self.snapshot.store(None);
        previous
    }

    /// Install (or replace) the methods contributed by a part type.
    pub(crate) fn add_part(&self, type_id: TypeId, type_name: &'static str, entries: Vec<MethodEntry>) {
        let mut sources = lock(&self.sources);
        sources.parts.retain(|p| p.type_id != type_id);
        let methods = entries
            .into_iter()
            .map(|entry| Registration {
                seq: sources.next_seq(),
                entry,
            })
            .collect();
        sources.parts.push(PartLayer {
            type_id,
            type_name,
            methods,
        });
        self.snapshot.store(None);
    }

    /// Drop every method contributed by a part type.
    pub(crate) fn remove_part(&self, type_id: TypeId) -> bool {
        let mut sources = lock(&self.sources);
        let before = sources.parts.len();
        sources.parts.retain(|p| p.type_id != type_id);
        let removed = sources.parts.len() != before;
        if removed {
            self.snapshot.store(None);
        }
        removed
    }

    /// Force the next lookup to rebuild the aggregate.
    pub(crate) fn invalidate(&self) {
        let _sources = lock(&self.sources);
        self.snapshot.store(None);
    }

    /// Current aggregate, rebuilt if a structural change dropped it.
    pub fn snapshot(&self) -> Arc<HashMap<String, MethodEntry>> {
        if let Some(snapshot) = self.snapshot.load_full() {
            return snapshot;
        }

        let sources = lock(&self.sources);
        // another caller may have rebuilt while we waited for the lock
        if let Some(snapshot) = self.snapshot.load_full() {
            return snapshot;
        }
        let snapshot = Arc::new(sources.aggregate());
        self.snapshot.store(Some(Arc::clone(&snapshot)));
        tracing::debug!(
            "method registry rebuilt: {} methods from {} parts",
            snapshot.len(),
            sources.parts.len()
        );
        snapshot
    }

    pub fn lookup(&self, name: &str) -> Option<MethodEntry> {
        self.snapshot().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.snapshot().contains_key(name)
    }

    /// Sorted method names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.snapshot().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Type names of the parts currently contributing methods, in attach order.
    pub fn part_names(&self) -> Vec<&'static str> {
        lock(&self.sources).parts.iter().map(|p| p.type_name).collect()
    }
}
