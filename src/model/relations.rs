//! Relations: the relation map owned by every relatable host.
//!
//! The same container backs plain hosts, descriptors (type-level relations)
//! and relations (meta relations); only the [`ListenerScope`] tag differs.
//!
//! ## Locking
//!
//! Each container is guarded by its own reentrant lock. Every mutation and
//! the synchronous listener dispatch it triggers run while holding it, so a
//! listener may read and write the same host again. The interior `RefCell`
//! is never borrowed while user code (providers, listeners, behaviors) runs.

use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Weak};

use hashbrown::HashMap;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use super::relation::Target;
use super::{Relation, RelationKind, RelationType, RelationValue, TypeHandle, TypeKey};
use crate::automatic::{self, AttachState};
use crate::event::{EventType, ListenerScope, RelationEvent};
use crate::model::Modifiers;
use crate::predicate::RelationPredicate;
use crate::{Error, Result};

type RelationMap = HashMap<TypeKey, Relation>;

/// A relation container. Cloning yields another handle to the same map.
#[derive(Clone)]
pub struct Relations {
    inner: Arc<RelationsInner>,
}

pub(crate) struct RelationsInner {
    scope: ListenerScope,
    map: ReentrantMutex<RefCell<RelationMap>>,
}

/// Non-owning handle to a [`Relations`] container.
#[derive(Clone)]
pub struct WeakRelations(Weak<RelationsInner>);

impl WeakRelations {
    pub fn upgrade(&self) -> Option<Relations> {
        self.0.upgrade().map(Relations::from_inner)
    }
}

impl Default for Relations {
    fn default() -> Self {
        Self::new()
    }
}

impl Relations {
    /// A container for a plain host.
    pub fn new() -> Self {
        Self::with_scope(ListenerScope::Host)
    }

    pub(crate) fn with_scope(scope: ListenerScope) -> Self {
        Self {
            inner: Arc::new(RelationsInner {
                scope,
                map: ReentrantMutex::new(RefCell::new(RelationMap::new())),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<RelationsInner>) -> Self {
        Self { inner }
    }

    pub fn downgrade(&self) -> WeakRelations {
        WeakRelations(Arc::downgrade(&self.inner))
    }

    pub(crate) fn weak_inner(&self) -> Weak<RelationsInner> {
        Arc::downgrade(&self.inner)
    }

    /// Which kind of host this container belongs to.
    pub fn scope(&self) -> ListenerScope {
        self.inner.scope
    }

    pub fn ptr_eq(&self, other: &Relations) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Hold this host's lock across several operations.
    pub fn lock(&self) -> HostGuard<'_> {
        HostGuard {
            _guard: self.inner.map.lock(),
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// The stored target, or the descriptor's default value if there is no
    /// relation. The default is never stored.
    pub fn get<T: RelationValue>(&self, rtype: &RelationType<T>) -> Option<T> {
        match self.get_relation(rtype) {
            Some(relation) => relation.target::<T>(),
            None => rtype.default_value(self),
        }
    }

    /// Raw slot access.
    pub fn get_relation(&self, rtype: &impl TypeHandle) -> Option<Relation> {
        let guard = self.inner.map.lock();
        let map = guard.borrow();
        map.get(&rtype.type_key()).cloned()
    }

    pub fn has_relation(&self, rtype: &impl TypeHandle) -> bool {
        let guard = self.inner.map.lock();
        let map = guard.borrow();
        map.contains_key(&rtype.type_key())
    }

    /// All non-private relations matching `predicate`, in descriptor
    /// creation order.
    pub fn get_all(&self, predicate: &impl RelationPredicate) -> Vec<Relation> {
        let mut relations: Vec<Relation> = self
            .snapshot()
            .into_iter()
            .filter(|r| !r.relation_type().has_modifier(Modifiers::PRIVATE))
            .filter(|r| predicate.test(r))
            .collect();
        relations.sort_by_key(|r| r.relation_type().key());
        relations
    }

    pub fn has_relations(&self, predicate: &impl RelationPredicate) -> bool {
        self.snapshot()
            .iter()
            .filter(|r| !r.relation_type().has_modifier(Modifiers::PRIVATE))
            .any(|r| predicate.test(r))
    }

    /// Number of non-private relations.
    pub fn relation_count(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|r| !r.relation_type().has_modifier(Modifiers::PRIVATE))
            .count()
    }

    fn snapshot(&self) -> Vec<Relation> {
        let guard = self.inner.map.lock();
        let map = guard.borrow();
        map.values().cloned().collect()
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Materialize the relation with the descriptor's initial value if it
    /// does not exist yet. Idempotent.
    pub fn init<T: RelationValue>(&self, rtype: &RelationType<T>) -> Result<Relation> {
        let _guard = self.inner.map.lock();
        if let Some(existing) = self.get_relation(rtype) {
            return Ok(existing);
        }
        let value = rtype.initial_value(self).ok_or_else(|| {
            Error::InvalidArgument(format!("relation type {} has no initial value", rtype.name()))
        })?;
        self.create(rtype, value)
    }

    /// Set the target, creating the relation if needed, and notify
    /// listeners with ADD or UPDATE before returning.
    pub fn set<T: RelationValue>(&self, rtype: &RelationType<T>, value: T) -> Result<Relation> {
        self.apply_set(rtype, value, false)
    }

    /// `set` on behalf of the owning automatic type, which may write
    /// READONLY relations.
    pub(crate) fn apply_set<T: RelationValue>(
        &self,
        rtype: &RelationType<T>,
        value: T,
        privileged: bool,
    ) -> Result<Relation> {
        let _guard = self.inner.map.lock();
        let Some(relation) = self.get_relation(rtype) else {
            if !privileged && rtype.has_modifier(Modifiers::READONLY) {
                return Err(Error::ModifierViolation {
                    relation: rtype.name().to_owned(),
                    modifier: Modifiers::READONLY,
                });
            }
            return self.create(rtype, value);
        };

        match relation.kind() {
            RelationKind::Direct => {}
            RelationKind::Alias(wrapped) => return self.write_through(&relation, wrapped, value),
            RelationKind::View(_) => {
                return Err(Error::ModifierViolation {
                    relation: rtype.name().to_owned(),
                    modifier: Modifiers::READONLY,
                });
            }
        }

        if rtype.has_modifier(Modifiers::FINAL) {
            return Err(Error::ModifierViolation {
                relation: rtype.name().to_owned(),
                modifier: Modifiers::FINAL,
            });
        }
        if !privileged && rtype.has_modifier(Modifiers::READONLY) {
            return Err(Error::ModifierViolation {
                relation: rtype.name().to_owned(),
                modifier: Modifiers::READONLY,
            });
        }

        let previous = relation.replace_target(Arc::new(value));
        self.dispatch(&RelationEvent::new(EventType::Update, self.clone(), relation.clone(), previous))?;
        Ok(relation)
    }

    /// Remove the relation if present and notify listeners with REMOVE.
    pub fn delete(&self, rtype: &impl TypeHandle) -> Result<()> {
        let _guard = self.inner.map.lock();
        let Some(relation) = self.get_relation(rtype) else {
            return Ok(());
        };
        let any = relation.relation_type();
        for modifier in [Modifiers::FINAL, Modifiers::READONLY] {
            if any.has_modifier(modifier) {
                return Err(Error::ModifierViolation {
                    relation: any.name().to_owned(),
                    modifier,
                });
            }
        }
        self.remove(relation)
    }

    /// Delete every non-private relation, bypassing modifier checks.
    /// Listeners receive a REMOVE event for each.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.inner.map.lock();
        for relation in self.get_all(&|_: &Relation| true) {
            self.remove(relation)?;
        }
        Ok(())
    }

    fn create<T: RelationValue>(&self, rtype: &RelationType<T>, value: T) -> Result<Relation> {
        let relation = Relation::direct(self, rtype.erase(), Arc::new(value));
        self.publish(rtype, relation)
    }

    /// Insert a new relation, attach its automatic type and announce it.
    /// The relation stays in place and ADD is still dispatched when
    /// attaching fails; the attach error is returned afterwards.
    fn publish<T: RelationValue>(&self, rtype: &RelationType<T>, relation: Relation) -> Result<Relation> {
        self.insert(relation.clone());
        let attached = match rtype.behavior() {
            Some(behavior) => automatic::attach(self, rtype, &relation, behavior),
            None => Ok(()),
        };
        self.dispatch(&RelationEvent::new(EventType::Add, self.clone(), relation.clone(), None))?;
        attached?;
        Ok(relation)
    }

    /// Remove `relation` and every alias or view forwarding to it.
    fn remove(&self, relation: Relation) -> Result<()> {
        let removed = self
            .inner
            .map
            .lock()
            .borrow_mut()
            .remove(&relation.relation_type().key());
        if !removed.is_some_and(|r| r.ptr_eq(&relation)) {
            return Ok(());
        }
        if relation.attach_state() == AttachState::Attached {
            automatic::detach(self, &relation);
        }
        self.dispatch(&RelationEvent::new(EventType::Remove, self.clone(), relation.clone(), None))?;

        let wrappers: Vec<Relation> = self
            .snapshot()
            .into_iter()
            .filter(|r| r.wrapped().is_some_and(|w| w.ptr_eq(&relation)))
            .collect();
        for wrapper in wrappers {
            self.remove(wrapper)?;
        }
        Ok(())
    }

    fn insert(&self, relation: Relation) {
        self.inner
            .map
            .lock()
            .borrow_mut()
            .insert(relation.relation_type().key(), relation);
    }

    fn write_through<T: RelationValue>(&self, alias: &Relation, wrapped: &Relation, value: T) -> Result<Relation> {
        let host = wrapped.host().ok_or_else(|| {
            Error::InvalidArgument(format!("host of aliased relation {} was dropped", wrapped.name()))
        })?;
        let wrapped_type = wrapped.relation_type().downcast::<T>()?;
        if !host.get_relation(&wrapped_type).is_some_and(|r| r.ptr_eq(wrapped)) {
            return Err(Error::InvalidArgument(format!(
                "aliased relation {} no longer exists",
                wrapped.name()
            )));
        }
        let previous = alias.raw_target();
        host.set(&wrapped_type, value)?;
        self.dispatch(&RelationEvent::new(EventType::Update, self.clone(), alias.clone(), previous))?;
        Ok(alias.clone())
    }

    // ========================================================================
    // Alias / view relations
    // ========================================================================

    /// Expose the relation of `from` under `alias` as well. Reads and writes
    /// of the alias go to the original relation.
    pub fn alias<T: RelationValue>(&self, from: &RelationType<T>, alias: &RelationType<T>) -> Result<Relation> {
        let _guard = self.inner.map.lock();
        let original = self.wrap_source(from, alias)?;
        self.create_wrapper(alias, RelationKind::Alias(original))
    }

    /// Expose the relation of `from` read-only under `view`.
    pub fn view<T: RelationValue>(&self, from: &RelationType<T>, view: &RelationType<T>) -> Result<Relation> {
        let _guard = self.inner.map.lock();
        let original = self.wrap_source(from, view)?;
        self.create_wrapper(view, RelationKind::View(original))
    }

    fn wrap_source<T: RelationValue>(&self, from: &RelationType<T>, wrapper: &RelationType<T>) -> Result<Relation> {
        let original = self.get_relation(from).ok_or_else(|| {
            Error::InvalidArgument(format!("no relation {} to wrap", from.name()))
        })?;
        if self.has_relation(wrapper) {
            return Err(Error::InvalidArgument(format!(
                "relation {} already exists",
                wrapper.name()
            )));
        }
        Ok(original)
    }

    fn create_wrapper<T: RelationValue>(&self, rtype: &RelationType<T>, kind: RelationKind) -> Result<Relation> {
        self.publish(rtype, Relation::wrapper(self, rtype.erase(), kind))
    }

    // ========================================================================
    // Internal storage (no events, no modifier checks)
    // ========================================================================

    /// Store a value without notifying anyone. Used for listener lists and
    /// coupling sets, which must not observe their own changes.
    pub(crate) fn put_silent<T: RelationValue>(&self, rtype: &RelationType<T>, value: T) {
        let _guard = self.inner.map.lock();
        match self.get_relation(rtype) {
            Some(relation) => {
                relation.replace_target(Arc::new(value));
            }
            None => self.insert(Relation::direct(self, rtype.erase(), Arc::new(value))),
        }
    }

    pub(crate) fn replace_silent(&self, relation: &Relation, target: Target) {
        let _guard = self.inner.map.lock();
        relation.replace_target(target);
    }
}

impl fmt::Debug for Relations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .get_all(&|_: &Relation| true)
            .iter()
            .map(|r| r.name().to_owned())
            .collect();
        f.debug_struct("Relations")
            .field("scope", &self.inner.scope)
            .field("relations", &names)
            .finish()
    }
}

/// Guard returned by [`Relations::lock`].
pub struct HostGuard<'a> {
    _guard: ReentrantMutexGuard<'a, RefCell<RelationMap>>,
}

// ============================================================================
// Relatable
// ============================================================================

/// Any object owning a set of relations.
///
/// Implementors only provide access to their container; all relation
/// operations come with it.
pub trait Relatable {
    fn relations(&self) -> &Relations;

    fn get<T: RelationValue>(&self, rtype: &RelationType<T>) -> Option<T> {
        self.relations().get(rtype)
    }

    fn set<T: RelationValue>(&self, rtype: &RelationType<T>, value: T) -> Result<Relation> {
        self.relations().set(rtype, value)
    }

    fn init<T: RelationValue>(&self, rtype: &RelationType<T>) -> Result<Relation> {
        self.relations().init(rtype)
    }

    fn delete(&self, rtype: &impl TypeHandle) -> Result<()> {
        self.relations().delete(rtype)
    }

    fn get_relation(&self, rtype: &impl TypeHandle) -> Option<Relation> {
        self.relations().get_relation(rtype)
    }

    fn has_relation(&self, rtype: &impl TypeHandle) -> bool {
        self.relations().has_relation(rtype)
    }

    fn get_all(&self, predicate: &impl RelationPredicate) -> Vec<Relation> {
        self.relations().get_all(predicate)
    }

    fn has_relations(&self, predicate: &impl RelationPredicate) -> bool {
        self.relations().has_relations(predicate)
    }
}

impl Relatable for Relations {
    fn relations(&self) -> &Relations {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::if_type;

    fn name() -> RelationType<String> {
        RelationType::new("NAME")
    }

    #[test]
    fn test_get_returns_default_without_storing() {
        let host = Relations::new();
        let count = RelationType::<i64>::builder("COUNT").default_value(0).build();

        assert_eq!(host.get(&count), Some(0));
        assert!(!host.has_relation(&count));
    }

    #[test]
    fn test_set_then_get() {
        let host = Relations::new();
        let name = name();
        host.set(&name, "x".to_string()).unwrap();
        assert_eq!(host.get(&name), Some("x".to_string()));

        host.set(&name, "y".to_string()).unwrap();
        assert_eq!(host.get(&name), Some("y".to_string()));
        assert_eq!(host.relation_count(), 1);
    }

    #[test]
    fn test_init_is_idempotent() {
        let host = Relations::new();
        let items = RelationType::<Vec<u32>>::builder("ITEMS").initial_value(vec![1]).build();

        let first = host.init(&items).unwrap();
        host.set(&items, vec![1, 2]).unwrap();
        let second = host.init(&items).unwrap();

        assert!(first.ptr_eq(&second));
        assert_eq!(host.get(&items), Some(vec![1, 2]));
    }

    #[test]
    fn test_init_without_initial_value_fails() {
        let host = Relations::new();
        assert!(matches!(host.init(&name()), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_delete_restores_default() {
        let host = Relations::new();
        let count = RelationType::<i64>::builder("COUNT").default_value(0).build();
        host.set(&count, 42).unwrap();
        host.delete(&count).unwrap();

        assert_eq!(host.get(&count), Some(0));
        assert!(!host.has_relation(&count));

        // Deleting again is a no-op.
        host.delete(&count).unwrap();
    }

    #[test]
    fn test_final_permits_one_set() {
        let host = Relations::new();
        let id = RelationType::<u64>::builder("ID").modifiers(Modifiers::FINAL).build();

        host.set(&id, 1).unwrap();
        let err = host.set(&id, 2).unwrap_err();
        assert!(matches!(err, Error::ModifierViolation { modifier, .. } if modifier == Modifiers::FINAL));
        assert_eq!(host.get(&id), Some(1));
        assert!(host.delete(&id).is_err());
    }

    #[test]
    fn test_readonly_rejects_public_set() {
        let host = Relations::new();
        let total = RelationType::<u64>::builder("TOTAL")
            .modifiers(Modifiers::READONLY)
            .initial_value(0)
            .build();

        assert!(matches!(
            host.set(&total, 1),
            Err(Error::ModifierViolation { modifier, .. }) if modifier == Modifiers::READONLY
        ));
        host.init(&total).unwrap();
        assert_eq!(host.get(&total), Some(0));
        assert!(host.set(&total, 1).is_err());
    }

    #[test]
    fn test_get_all_filters_private() {
        let host = Relations::new();
        let name = name();
        let secret = RelationType::<String>::builder("SECRET")
            .modifiers(Modifiers::PRIVATE)
            .build();
        host.set(&name, "x".to_string()).unwrap();
        host.set(&secret, "hidden".to_string()).unwrap();

        let all = host.get_all(&|_: &Relation| true);
        assert_eq!(all.len(), 1);
        assert_eq!(host.relation_count(), 1);
        assert!(host.has_relation(&secret));

        let named = host.get_all(&if_type(&name));
        assert_eq!(named.len(), 1);
        assert_eq!(named[0].target::<String>(), Some("x".to_string()));
    }

    #[test]
    fn test_alias_writes_through() {
        let host = Relations::new();
        let name = name();
        let label = RelationType::<String>::new("LABEL");
        host.set(&name, "Ada".to_string()).unwrap();

        let alias = host.alias(&name, &label).unwrap();
        assert!(alias.is_alias());
        assert_eq!(host.get(&label), Some("Ada".to_string()));

        host.set(&label, "Grace".to_string()).unwrap();
        assert_eq!(host.get(&name), Some("Grace".to_string()));
    }

    #[test]
    fn test_view_is_read_only() {
        let host = Relations::new();
        let name = name();
        let shown = RelationType::<String>::new("SHOWN");
        host.set(&name, "Ada".to_string()).unwrap();
        host.view(&name, &shown).unwrap();

        assert_eq!(host.get(&shown), Some("Ada".to_string()));
        assert!(host.set(&shown, "x".to_string()).is_err());
        host.set(&name, "Grace".to_string()).unwrap();
        assert_eq!(host.get(&shown), Some("Grace".to_string()));
    }

    #[test]
    fn test_delete_removes_aliases_and_views() {
        let host = Relations::new();
        let name = name();
        let label = RelationType::<String>::new("LABEL");
        let shown = RelationType::<String>::new("SHOWN");
        host.set(&name, "a".to_string()).unwrap();
        let alias = host.alias(&name, &label).unwrap();
        host.view(&name, &shown).unwrap();

        let removed = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&removed);
        host.add_listener(move |event| {
            if event.kind() == EventType::Remove {
                sink.lock().push(event.element().relation_type().simple_name().to_string());
            }
            Ok(())
        });

        host.delete(&name).unwrap();
        assert_eq!(host.get(&label), None);
        assert_eq!(host.get(&shown), None);
        assert_eq!(host.relation_count(), 0);
        let mut names = removed.lock().clone();
        names.sort();
        assert_eq!(names, vec!["LABEL", "NAME", "SHOWN"]);

        // A stale alias handle must not bring the original back.
        host.set(&name, "b".to_string()).unwrap();
        assert!(host.write_through(&alias, alias.wrapped().unwrap(), "d".to_string()).is_err());
        assert_eq!(host.get(&name), Some("b".to_string()));
    }

    #[test]
    fn test_alias_of_deleted_relation_is_not_recreated() {
        let host = Relations::new();
        let name = name();
        let label = RelationType::<String>::new("LABEL");
        host.set(&name, "a".to_string()).unwrap();
        host.alias(&name, &label).unwrap();
        host.delete(&name).unwrap();

        // LABEL is a fresh direct relation now; NAME stays deleted.
        host.set(&label, "b".to_string()).unwrap();
        assert!(!host.has_relation(&name));
        assert!(!host.get_relation(&label).unwrap().is_alias());
    }

    #[test]
    fn test_failed_attach_still_announces_add() {
        struct Refuse;
        impl crate::automatic::AutomaticBehavior<u32> for Refuse {
            fn process_event(
                &self,
                _: &crate::automatic::AutomaticScope<'_, u32>,
                _: &RelationEvent,
            ) -> Result<()> {
                Ok(())
            }
            fn protect_target(&self, _: &crate::automatic::AutomaticScope<'_, u32>, _: &Relation) -> Result<()> {
                Err(Error::InvalidArgument("cannot protect".into()))
            }
        }

        let guarded = RelationType::<u32>::builder("GUARDED")
            .modifiers(Modifiers::FINAL)
            .automatic(Refuse)
            .build();
        let host = Relations::new();
        let added = Arc::new(parking_lot::Mutex::new(0usize));
        let sink = Arc::clone(&added);
        host.add_listener(move |event| {
            if event.kind() == EventType::Add {
                *sink.lock() += 1;
            }
            Ok(())
        });

        assert!(matches!(host.set(&guarded, 1), Err(Error::InvalidArgument(_))));
        assert!(host.has_relation(&guarded));
        assert_eq!(*added.lock(), 1);
    }

    #[test]
    fn test_clear() {
        let host = Relations::new();
        let name = name();
        let id = RelationType::<u64>::builder("ID").modifiers(Modifiers::FINAL).build();
        host.set(&name, "x".to_string()).unwrap();
        host.set(&id, 1).unwrap();

        host.clear().unwrap();
        assert_eq!(host.relation_count(), 0);
    }

    #[test]
    fn test_relatable_for_custom_host() {
        struct Person {
            relations: Relations,
        }
        impl Relatable for Person {
            fn relations(&self) -> &Relations {
                &self.relations
            }
        }

        let person = Person { relations: Relations::new() };
        let name = name();
        person.set(&name, "Ada".to_string()).unwrap();
        assert_eq!(person.get(&name), Some("Ada".to_string()));
        assert!(person.has_relation(&name));
    }
}
