//! Relation: the binding of one descriptor to one value on one host.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use super::relations::RelationsInner;
use super::{AnyRelationType, Relatable, RelationValue, Relations};
use crate::automatic::AttachState;
use crate::event::ListenerScope;

/// Type-erased relation target.
pub(crate) type Target = Arc<dyn Any + Send + Sync>;

/// How a relation obtains its target.
#[derive(Debug, Clone)]
pub enum RelationKind {
    /// Holds its own target.
    Direct,
    /// Reads and writes through to another relation.
    Alias(Relation),
    /// Reads through to another relation; cannot be written.
    View(Relation),
}

/// A relation slot. Exclusively owned by its host's relation map; handles
/// returned to callers share the same slot.
#[derive(Clone)]
pub struct Relation {
    node: Arc<RelationNode>,
}

struct RelationNode {
    rtype: AnyRelationType,
    host: Weak<RelationsInner>,
    kind: RelationKind,
    target: Mutex<Option<Target>>,
    meta: OnceLock<Relations>,
    attach: Mutex<AttachState>,
}

impl Relation {
    pub(crate) fn direct(host: &Relations, rtype: AnyRelationType, target: Target) -> Self {
        Self::build(host, rtype, RelationKind::Direct, Some(target))
    }

    pub(crate) fn wrapper(host: &Relations, rtype: AnyRelationType, kind: RelationKind) -> Self {
        Self::build(host, rtype, kind, None)
    }

    fn build(host: &Relations, rtype: AnyRelationType, kind: RelationKind, target: Option<Target>) -> Self {
        Self {
            node: Arc::new(RelationNode {
                rtype,
                host: host.weak_inner(),
                kind,
                target: Mutex::new(target),
                meta: OnceLock::new(),
                attach: Mutex::new(AttachState::Unattached),
            }),
        }
    }

    pub fn relation_type(&self) -> &AnyRelationType {
        &self.node.rtype
    }

    pub fn name(&self) -> &str {
        self.node.rtype.name()
    }

    pub fn kind(&self) -> &RelationKind {
        &self.node.kind
    }

    /// The typed target, or `None` if `T` is not the value type.
    pub fn target<T: RelationValue>(&self) -> Option<T> {
        self.raw_target()?.downcast_ref::<T>().cloned()
    }

    pub(crate) fn raw_target(&self) -> Option<Target> {
        match &self.node.kind {
            RelationKind::Direct => self.node.target.lock().clone(),
            RelationKind::Alias(wrapped) | RelationKind::View(wrapped) => wrapped.raw_target(),
        }
    }

    /// Swap the stored target, returning the previous one.
    pub(crate) fn replace_target(&self, target: Target) -> Option<Target> {
        self.node.target.lock().replace(target)
    }

    /// The host this relation belongs to, if it is still alive.
    pub fn host(&self) -> Option<Relations> {
        self.node.host.upgrade().map(Relations::from_inner)
    }

    pub fn wrapped(&self) -> Option<&Relation> {
        match &self.node.kind {
            RelationKind::Direct => None,
            RelationKind::Alias(wrapped) | RelationKind::View(wrapped) => Some(wrapped),
        }
    }

    pub fn is_alias(&self) -> bool {
        matches!(self.node.kind, RelationKind::Alias(_))
    }

    pub fn is_view(&self) -> bool {
        matches!(self.node.kind, RelationKind::View(_))
    }

    /// Whether this relation forwards to another one instead of holding a target.
    pub fn is_wrapper(&self) -> bool {
        !matches!(self.node.kind, RelationKind::Direct)
    }

    pub fn has_meta_relations(&self) -> bool {
        self.node.meta.get().is_some_and(|meta| meta.relation_count() > 0)
    }

    /// Meta relations without creating the container.
    pub(crate) fn meta_if_present(&self) -> Option<&Relations> {
        self.node.meta.get()
    }

    pub fn attach_state(&self) -> AttachState {
        *self.node.attach.lock()
    }

    pub(crate) fn set_attach_state(&self, state: AttachState) {
        *self.node.attach.lock() = state;
    }

    pub fn ptr_eq(&self, other: &Relation) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }
}

/// Relations are hosts themselves (scope RELATION): meta relations, relation
/// listeners and couplings live here.
impl Relatable for Relation {
    fn relations(&self) -> &Relations {
        self.node
            .meta
            .get_or_init(|| Relations::with_scope(ListenerScope::Relation))
    }
}

impl fmt::Debug for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relation")
            .field("type", &self.node.rtype.name())
            .field("kind", &match &self.node.kind {
                RelationKind::Direct => "direct",
                RelationKind::Alias(_) => "alias",
                RelationKind::View(_) => "view",
            })
            .field("attach", &self.attach_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RelationType;

    #[test]
    fn test_target_downcast() {
        let host = Relations::new();
        let name = RelationType::<String>::new("NAME");
        let relation = host.set(&name, "Ada".to_string()).unwrap();

        assert_eq!(relation.target::<String>(), Some("Ada".to_string()));
        assert_eq!(relation.target::<i64>(), None);
        assert!(relation.host().unwrap().ptr_eq(&host));
    }

    #[test]
    fn test_meta_relations() {
        let host = Relations::new();
        let name = RelationType::<String>::new("NAME");
        let note = RelationType::<String>::new("NOTE");
        let relation = host.set(&name, "Ada".to_string()).unwrap();

        assert!(!relation.has_meta_relations());
        relation.set(&note, "checked".to_string()).unwrap();
        assert!(relation.has_meta_relations());
        assert_eq!(relation.get(&note), Some("checked".to_string()));
        assert_eq!(relation.relations().scope(), ListenerScope::Relation);

        // The host's own map is untouched by meta relations.
        assert!(!host.has_relation(&note));
    }

    #[test]
    fn test_host_dropped() {
        let name = RelationType::<String>::new("NAME");
        let relation = {
            let host = Relations::new();
            host.set(&name, "Ada".to_string()).unwrap()
        };
        assert!(relation.host().is_none());
        assert_eq!(relation.target::<String>(), Some("Ada".to_string()));
    }
}
