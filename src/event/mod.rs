//! # Relation Events
//!
//! Synchronous change notification. Listener lists are ordinary relations of
//! one of three reserved descriptors, picked by the scope tag of the container
//! they are stored in:
//!
//! | Scope | Container | Observes |
//! |-------|-----------|----------|
//! | `Host` | a plain host | every relation of that host |
//! | `Type` | a descriptor | relations of that type on any host |
//! | `Relation` | a relation | that single relation |
//!
//! A mutation notifies relation listeners first, then type listeners, then
//! host listeners, each in registration order. The first listener error
//! aborts the dispatch and is returned to the mutating caller; the mutation
//! itself stays applied.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::model::relation::Target;
use crate::model::{
    Modifiers, Relatable, Relation, RelationType, RelationValue, Relations, TypeHandle, TypeKey,
};
use crate::{Error, Result};

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// Event types
// ============================================================================

/// What happened to a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Add,
    Update,
    Remove,
}

/// The kind of host a relation container belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListenerScope {
    Host,
    Type,
    Relation,
}

impl ListenerScope {
    /// The reserved descriptor under which this scope stores its listeners.
    pub fn listener_type(self) -> &'static RelationType<ListenerList> {
        match self {
            ListenerScope::Host => &*HOST_LISTENERS,
            ListenerScope::Type => &*TYPE_LISTENERS,
            ListenerScope::Relation => &*RELATION_LISTENERS,
        }
    }
}

/// Listeners registered on plain hosts.
pub static HOST_LISTENERS: LazyLock<RelationType<ListenerList>> =
    LazyLock::new(|| reserved_listener_type("HOST_LISTENERS"));

/// Listeners registered on descriptors.
pub static TYPE_LISTENERS: LazyLock<RelationType<ListenerList>> =
    LazyLock::new(|| reserved_listener_type("TYPE_LISTENERS"));

/// Listeners registered on single relations.
pub static RELATION_LISTENERS: LazyLock<RelationType<ListenerList>> =
    LazyLock::new(|| reserved_listener_type("RELATION_LISTENERS"));

fn reserved_listener_type(name: &str) -> RelationType<ListenerList> {
    RelationType::builder(name)
        .modifiers(Modifiers::PRIVATE | Modifiers::TRANSIENT)
        .default_value(ListenerList::default())
        .build()
}

/// An ephemeral change notification.
#[derive(Clone)]
pub struct RelationEvent {
    kind: EventType,
    scope: Relations,
    element: Relation,
    previous: Option<Target>,
}

impl RelationEvent {
    pub(crate) fn new(kind: EventType, scope: Relations, element: Relation, previous: Option<Target>) -> Self {
        Self {
            kind,
            scope,
            element,
            previous,
        }
    }

    pub fn kind(&self) -> EventType {
        self.kind
    }

    /// The host on which the mutation occurred.
    pub fn scope(&self) -> &Relations {
        &self.scope
    }

    /// The relation that was added, updated or removed.
    pub fn element(&self) -> &Relation {
        &self.element
    }

    pub fn element_type(&self) -> TypeKey {
        self.element.relation_type().key()
    }

    pub fn is_type(&self, rtype: &impl TypeHandle) -> bool {
        self.element_type() == rtype.type_key()
    }

    /// The element's current target.
    pub fn value<T: RelationValue>(&self) -> Option<T> {
        self.element.target::<T>()
    }

    /// The target before an UPDATE.
    pub fn previous<T: RelationValue>(&self) -> Option<T> {
        self.previous.as_ref()?.downcast_ref::<T>().cloned()
    }
}

impl fmt::Debug for RelationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationEvent")
            .field("kind", &self.kind)
            .field("element", &self.element.name())
            .field("scope", &self.scope.scope())
            .finish()
    }
}

// ============================================================================
// Listeners
// ============================================================================

/// Identifies a registered listener for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerId(pub u64);

type Callback = Arc<dyn Fn(&RelationEvent) -> Result<()> + Send + Sync>;

/// A registered event callback.
#[derive(Clone)]
pub struct Listener {
    id: ListenerId,
    /// Descriptor this listener acts for; it never sees events of that type.
    owner: Option<TypeKey>,
    /// Only events of this type are delivered.
    only: Option<TypeKey>,
    callback: Callback,
}

impl Listener {
    pub fn new(f: impl Fn(&RelationEvent) -> Result<()> + Send + Sync + 'static) -> Self {
        Self {
            id: ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed)),
            owner: None,
            only: None,
            callback: Arc::new(f),
        }
    }

    pub(crate) fn owned_by(mut self, owner: TypeKey) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn only_for(mut self, rtype: &impl TypeHandle) -> Self {
        self.only = Some(rtype.type_key());
        self
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    fn accepts(&self, element: TypeKey) -> bool {
        self.owner != Some(element) && self.only.is_none_or(|only| only == element)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("only", &self.only)
            .finish()
    }
}

/// Ordered listener registrations, stored as a relation value.
#[derive(Debug, Clone, Default)]
pub struct ListenerList {
    entries: SmallVec<[Listener; 2]>,
}

impl ListenerList {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Listener> {
        self.entries.iter()
    }
}

// ============================================================================
// Registration and dispatch
// ============================================================================

impl Relations {
    /// Register a listener for every relation event in this container's scope.
    pub fn add_listener(
        &self,
        f: impl Fn(&RelationEvent) -> Result<()> + Send + Sync + 'static,
    ) -> ListenerId {
        self.register_listener(Listener::new(f))
    }

    /// Register a listener that only receives events of `rtype`.
    pub fn add_listener_for(
        &self,
        rtype: &impl TypeHandle,
        f: impl Fn(&RelationEvent) -> Result<()> + Send + Sync + 'static,
    ) -> ListenerId {
        self.register_listener(Listener::new(f).only_for(rtype))
    }

    pub fn register_listener(&self, listener: Listener) -> ListenerId {
        let _guard = self.lock();
        let id = listener.id;
        let mut list = self.listeners();
        list.entries.push(listener);
        debug!(scope = ?self.scope(), listener = id.0, count = list.len(), "listener added");
        self.put_silent(self.scope().listener_type(), list);
        id
    }

    /// Returns false if no listener with this id was registered here.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let _guard = self.lock();
        let mut list = self.listeners();
        let before = list.len();
        list.entries.retain(|l| l.id != id);
        let removed = list.len() != before;
        if removed {
            debug!(scope = ?self.scope(), listener = id.0, "listener removed");
            self.put_silent(self.scope().listener_type(), list);
        }
        removed
    }

    /// Drop every listener acting for `owner`.
    pub(crate) fn remove_owned_listeners(&self, owner: TypeKey) {
        let _guard = self.lock();
        let mut list = self.listeners();
        list.entries.retain(|l| l.owner != Some(owner));
        self.put_silent(self.scope().listener_type(), list);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners().len()
    }

    pub(crate) fn listeners(&self) -> ListenerList {
        self.get(self.scope().listener_type()).unwrap_or_default()
    }

    /// Notify relation, type and host listeners of `event`.
    pub(crate) fn dispatch(&self, event: &RelationEvent) -> Result<()> {
        let element = event.element();
        let key = element.relation_type().key();

        let mut listeners: SmallVec<[Listener; 4]> = SmallVec::new();
        if let Some(meta) = element.meta_if_present() {
            listeners.extend(meta.listeners().entries);
        }
        listeners.extend(element.relation_type().relations().listeners().entries);
        listeners.extend(self.listeners().entries);

        trace!(
            kind = ?event.kind(),
            relation = element.name(),
            listeners = listeners.len(),
            "dispatching relation event"
        );

        for listener in listeners.iter().filter(|l| l.accepts(key)) {
            if let Err(err) = (listener.callback)(event) {
                warn!(
                    kind = ?event.kind(),
                    relation = element.name(),
                    listener = listener.id.0,
                    error = %err,
                    "listener failed, aborting dispatch"
                );
                return Err(Error::Listener {
                    relation: element.name().to_owned(),
                    source: Box::new(err),
                });
            }
        }
        Ok(())
    }
}
