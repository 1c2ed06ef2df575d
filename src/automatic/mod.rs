//! # Automatic Relation Types
//!
//! An automatic type attaches itself as a host listener when its relation is
//! first created on a host and recomputes its value from the events of the
//! other relations there.
//!
//! ```text
//! UNATTACHED ──create──▶ ATTACHED ──delete──▶ DETACHED
//! ```
//!
//! Forwarding relations (aliases and views) never attach by default; the
//! check is [`AutomaticBehavior::attaches_to`] and can be overridden.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::event::{Listener, RelationEvent};
use crate::model::{Modifiers, Relation, RelationType, RelationValue, Relations};
use crate::Result;

/// Lifecycle of an automatic type on one relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttachState {
    Unattached,
    Attached,
    Detached,
}

/// The reactive part of an automatic type.
pub trait AutomaticBehavior<T>: Send + Sync + 'static {
    /// Called for every event on the host whose element is not itself an
    /// automatic relation.
    fn process_event(&self, scope: &AutomaticScope<'_, T>, event: &RelationEvent) -> Result<()>;

    /// Called once on attachment if the type is FINAL or READONLY, so the
    /// target can be replaced by a copy that cannot be mutated through
    /// shared references.
    fn protect_target(&self, scope: &AutomaticScope<'_, T>, relation: &Relation) -> Result<()> {
        let _ = (scope, relation);
        Ok(())
    }

    /// Whether to attach to `relation`.
    fn attaches_to(&self, relation: &Relation) -> bool {
        !relation.is_wrapper()
    }
}

/// The view an automatic type has of its host while it runs. Writes through
/// this scope may change READONLY relations of the owning type.
pub struct AutomaticScope<'a, T> {
    host: &'a Relations,
    rtype: &'a RelationType<T>,
}

impl<'a, T: RelationValue> AutomaticScope<'a, T> {
    pub(crate) fn new(host: &'a Relations, rtype: &'a RelationType<T>) -> Self {
        Self { host, rtype }
    }

    pub fn host(&self) -> &Relations {
        self.host
    }

    pub fn relation_type(&self) -> &RelationType<T> {
        self.rtype
    }

    pub fn get(&self) -> Option<T> {
        self.host.get(self.rtype)
    }

    /// Set the owned relation, bypassing READONLY.
    pub fn set(&self, value: T) -> Result<Relation> {
        self.host.apply_set(self.rtype, value, true)
    }

    /// Replace the owned target without notifying listeners.
    pub fn replace_target(&self, value: T) {
        if let Some(relation) = self.host.get_relation(self.rtype) {
            self.host.replace_silent(&relation, Arc::new(value));
        }
    }
}

/// Adapter turning a closure into an [`AutomaticBehavior`].
pub(crate) struct FnBehavior<F> {
    f: F,
}

impl<F> FnBehavior<F> {
    pub(crate) fn new(f: F) -> Self {
        Self { f }
    }
}

impl<T, F> AutomaticBehavior<T> for FnBehavior<F>
where
    T: RelationValue,
    F: Fn(&AutomaticScope<'_, T>, &RelationEvent) -> Result<()> + Send + Sync + 'static,
{
    fn process_event(&self, scope: &AutomaticScope<'_, T>, event: &RelationEvent) -> Result<()> {
        (self.f)(scope, event)
    }
}

// ============================================================================
// Attachment
// ============================================================================

pub(crate) fn attach<T: RelationValue>(
    host: &Relations,
    rtype: &RelationType<T>,
    relation: &Relation,
    behavior: &Arc<dyn AutomaticBehavior<T>>,
) -> Result<()> {
    if !behavior.attaches_to(relation) {
        return Ok(());
    }

    let owner = rtype.clone();
    let reactor = Arc::clone(behavior);
    host.register_listener(
        Listener::new(move |event| {
            if event.element().relation_type().is_automatic() {
                return Ok(());
            }
            reactor.process_event(&AutomaticScope::new(event.scope(), &owner), event)
        })
        .owned_by(rtype.key()),
    );
    relation.set_attach_state(AttachState::Attached);
    debug!(relation = rtype.name(), "automatic type attached");

    if rtype.has_modifier(Modifiers::FINAL | Modifiers::READONLY) {
        behavior.protect_target(&AutomaticScope::new(host, rtype), relation)?;
    }
    Ok(())
}

pub(crate) fn detach(host: &Relations, relation: &Relation) {
    host.remove_owned_listeners(relation.relation_type().key());
    relation.set_attach_state(AttachState::Detached);
    debug!(relation = relation.name(), "automatic type detached");
}
