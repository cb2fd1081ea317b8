//! Parts — independently built modules that contribute methods to an endpoint.
//!
//! A part is constructed against a live endpoint and hands back the list of
//! methods it serves. The endpoint owns its parts; a part only keeps a
//! [`WeakEndpoint`] back to its owner.
//!
//! Parts can be attached eagerly (`Endpoint::attach_with`) or declared by
//! type (`Endpoint::declare_part`), in which case the part is constructed the
//! first time the registry or the part itself is accessed.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::rpc::endpoint::WeakEndpoint;
use crate::rpc::registry::MethodEntry;

/// A module contributing methods to an endpoint.
pub trait Part: Send + Sync + 'static {
    /// Methods served by this part. Called once, when the part is attached.
    fn methods(self: Arc<Self>) -> Vec<MethodEntry>;
}

/// A part the endpoint can construct on its own.
pub trait PartInit: Part + Sized {
    fn init(endpoint: WeakEndpoint) -> Self;
}

pub(crate) type SharedPart = Arc<dyn Any + Send + Sync>;

/// A constructed part ready to be installed.
pub(crate) struct AttachedPart {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub instance: SharedPart,
    pub methods: Vec<MethodEntry>,
}

impl AttachedPart {
    pub fn new<P: Part>(part: Arc<P>) -> Self {
        let methods = Arc::clone(&part).methods();
        Self {
            type_id: TypeId::of::<P>(),
            type_name: std::any::type_name::<P>(),
            instance: part,
            methods,
        }
    }
}

pub(crate) type PartFactory = Box<dyn FnOnce(WeakEndpoint) -> AttachedPart + Send>;

/// Live part instances keyed by type, plus declared parts not yet built.
#[derive(Default)]
pub(crate) struct PartSet {
    instances: RwLock<HashMap<TypeId, SharedPart>>,
    declared: Mutex<Vec<(TypeId, PartFactory)>>,
    has_declared: AtomicBool,
}

impl std::fmt::Debug for PartSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let instances = self
            .instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("PartSet")
            .field("instances", &instances)
            .field("has_declared", &self.has_declared.load(Ordering::Relaxed))
            .finish()
    }
}

impl PartSet {
    pub fn declare<P: PartInit>(&self) {
        let factory: PartFactory =
            Box::new(|endpoint| AttachedPart::new(Arc::new(P::init(endpoint))));
        let mut declared = self.declared.lock().unwrap_or_else(PoisonError::into_inner);
        declared.retain(|(id, _)| *id != TypeId::of::<P>());
        declared.push((TypeId::of::<P>(), factory));
        self.has_declared.store(true, Ordering::Release);
    }

    /// Take the factories of declared parts that have no live instance yet.
    pub fn take_declared(&self) -> Vec<PartFactory> {
        if !self.has_declared.load(Ordering::Acquire) {
            return Vec::new();
        }
        let pending: Vec<(TypeId, PartFactory)> = {
            let mut declared = self.declared.lock().unwrap_or_else(PoisonError::into_inner);
            self.has_declared.store(false, Ordering::Release);
            declared.drain(..).collect()
        };
        pending
            .into_iter()
            .filter(|(id, _)| !self.contains(*id))
            .map(|(_, factory)| factory)
            .collect()
    }

    pub fn insert(&self, type_id: TypeId, instance: SharedPart) {
        self.instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(type_id, instance);
    }

    pub fn remove(&self, type_id: TypeId) -> Option<SharedPart> {
        self.instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&type_id)
    }

    pub fn get(&self, type_id: TypeId) -> Option<SharedPart> {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&type_id)
            .cloned()
    }

    pub fn contains(&self, type_id: TypeId) -> bool {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&type_id)
    }

    pub fn len(&self) -> usize {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
