//! Relation types: the globally shared, immutable attribute descriptors.
//!
//! A `RelationType<T>` identifies one attribute with value type `T`. Identity
//! is by `TypeKey` (assigned from a process-wide counter), never by name: two
//! descriptors with the same simple name are still different types. The
//! qualified name is frozen once by a [`TypeRegistry`](crate::registry::TypeRegistry).

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use super::{Relatable, Relations};
use crate::automatic::{AutomaticBehavior, AutomaticScope, FnBehavior};
use crate::event::{ListenerScope, RelationEvent};
use crate::{Error, Result};

static NEXT_TYPE_KEY: AtomicU64 = AtomicU64::new(1);

/// Values that can be stored in a relation.
pub trait RelationValue: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> RelationValue for T {}

/// Opaque descriptor identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeKey(pub u64);

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags::bitflags! {
    /// Constraints a descriptor places on its relations.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Modifiers: u8 {
        /// The relation can be set exactly once.
        const FINAL     = 0b0000_0001;
        /// Only the owning automatic type may change the relation.
        const READONLY  = 0b0000_0010;
        /// Hidden from `get_all`, `has_relations` and `relation_count`.
        const PRIVATE   = 0b0000_0100;
        /// Not part of any persisted state.
        const TRANSIENT = 0b0000_1000;
        /// Applications are expected to always provide a value.
        const MANDATORY = 0b0001_0000;
    }
}

pub(crate) type ValueFn<T> = Arc<dyn Fn(&Relations) -> T + Send + Sync>;

/// The untyped half of a descriptor, shared by every handle to it.
pub(crate) struct TypeCore {
    key: TypeKey,
    simple_name: String,
    qualified_name: OnceLock<String>,
    modifiers: Modifiers,
    value_type: TypeId,
    value_type_name: &'static str,
    automatic: bool,
    relations: Relations,
}

/// The typed half: value providers and the optional reactive behavior.
pub(crate) struct Providers<T> {
    default_value: Option<ValueFn<T>>,
    initial_value: Option<ValueFn<T>>,
    behavior: Option<Arc<dyn AutomaticBehavior<T>>>,
}

// ============================================================================
// RelationType<T>
// ============================================================================

/// A typed relation descriptor.
///
/// Cloning is cheap and yields a handle to the same descriptor.
pub struct RelationType<T> {
    core: Arc<TypeCore>,
    providers: Arc<Providers<T>>,
}

impl<T> Clone for RelationType<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            providers: Arc::clone(&self.providers),
        }
    }
}

impl<T: RelationValue> RelationType<T> {
    /// A plain descriptor without default value, initial value or modifiers.
    pub fn new(name: impl Into<String>) -> Self {
        TypeBuilder::new(name).build()
    }

    pub fn builder(name: impl Into<String>) -> TypeBuilder<T> {
        TypeBuilder::new(name)
    }

    /// The value returned for hosts that have no relation of this type.
    /// Computed on every read and never stored.
    pub fn default_value(&self, host: &Relations) -> Option<T> {
        self.providers.default_value.as_ref().map(|f| f(host))
    }

    /// The value stored when a relation is materialized by `init`.
    /// Falls back to the default value.
    pub fn initial_value(&self, host: &Relations) -> Option<T> {
        match &self.providers.initial_value {
            Some(f) => Some(f(host)),
            None => self.default_value(host),
        }
    }

    /// Whether `init` can materialize a relation of this type.
    pub fn has_initial_value(&self) -> bool {
        self.providers.initial_value.is_some() || self.providers.default_value.is_some()
    }

    pub(crate) fn behavior(&self) -> Option<&Arc<dyn AutomaticBehavior<T>>> {
        self.providers.behavior.as_ref()
    }

    /// Erase the value type.
    pub fn erase(&self) -> AnyRelationType {
        AnyRelationType {
            core: Arc::clone(&self.core),
            typed: Arc::clone(&self.providers) as Arc<dyn Any + Send + Sync>,
        }
    }
}

impl<T> RelationType<T> {
    pub fn key(&self) -> TypeKey {
        self.core.key
    }

    /// The qualified name if registered, the simple name otherwise.
    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn simple_name(&self) -> &str {
        &self.core.simple_name
    }

    pub fn modifiers(&self) -> Modifiers {
        self.core.modifiers
    }

    pub fn has_modifier(&self, modifier: Modifiers) -> bool {
        self.core.modifiers.intersects(modifier)
    }

    pub fn is_automatic(&self) -> bool {
        self.core.automatic
    }

    pub fn is_registered(&self) -> bool {
        self.core.qualified_name.get().is_some()
    }
}

impl<T> fmt::Debug for RelationType<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationType")
            .field("key", &self.core.key)
            .field("name", &self.core.name())
            .field("value_type", &self.core.value_type_name)
            .finish()
    }
}

impl<T> fmt::Display for RelationType<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.core.name())
    }
}

impl<T> PartialEq for RelationType<T> {
    fn eq(&self, other: &Self) -> bool {
        self.core.key == other.core.key
    }
}

impl<T> Eq for RelationType<T> {}

impl TypeCore {
    fn name(&self) -> &str {
        self.qualified_name
            .get()
            .map(String::as_str)
            .unwrap_or(&self.simple_name)
    }
}

// ============================================================================
// TypeBuilder
// ============================================================================

/// Builder for [`RelationType`]. Descriptors are immutable once built.
pub struct TypeBuilder<T> {
    name: String,
    modifiers: Modifiers,
    default_value: Option<ValueFn<T>>,
    initial_value: Option<ValueFn<T>>,
    behavior: Option<Arc<dyn AutomaticBehavior<T>>>,
}

impl<T: RelationValue> TypeBuilder<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modifiers: Modifiers::empty(),
            default_value: None,
            initial_value: None,
            behavior: None,
        }
    }

    pub fn default_value(mut self, value: T) -> Self {
        self.default_value = Some(Arc::new(move |_| value.clone()));
        self
    }

    pub fn default_fn(mut self, f: impl Fn(&Relations) -> T + Send + Sync + 'static) -> Self {
        self.default_value = Some(Arc::new(f));
        self
    }

    pub fn initial_value(mut self, value: T) -> Self {
        self.initial_value = Some(Arc::new(move |_| value.clone()));
        self
    }

    pub fn initial_fn(mut self, f: impl Fn(&Relations) -> T + Send + Sync + 'static) -> Self {
        self.initial_value = Some(Arc::new(f));
        self
    }

    pub fn modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers |= modifiers;
        self
    }

    /// Make this an automatic type driven by `behavior`.
    pub fn automatic(mut self, behavior: impl AutomaticBehavior<T>) -> Self {
        self.behavior = Some(Arc::new(behavior));
        self
    }

    /// Shorthand for an automatic type that only recomputes on events.
    pub fn compute<F>(self, f: F) -> Self
    where
        F: Fn(&AutomaticScope<'_, T>, &RelationEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.automatic(FnBehavior::new(f))
    }

    pub fn build(self) -> RelationType<T> {
        let core = TypeCore {
            key: TypeKey(NEXT_TYPE_KEY.fetch_add(1, Ordering::Relaxed)),
            simple_name: self.name,
            qualified_name: OnceLock::new(),
            modifiers: self.modifiers,
            value_type: TypeId::of::<T>(),
            value_type_name: std::any::type_name::<T>(),
            automatic: self.behavior.is_some(),
            relations: Relations::with_scope(ListenerScope::Type),
        };
        RelationType {
            core: Arc::new(core),
            providers: Arc::new(Providers {
                default_value: self.default_value,
                initial_value: self.initial_value,
                behavior: self.behavior,
            }),
        }
    }
}

// ============================================================================
// AnyRelationType
// ============================================================================

/// A descriptor with its value type erased.
///
/// Used wherever descriptors of different value types are handled together:
/// registries, namespaces, events and batch operations.
#[derive(Clone)]
pub struct AnyRelationType {
    core: Arc<TypeCore>,
    typed: Arc<dyn Any + Send + Sync>,
}

impl AnyRelationType {
    pub fn key(&self) -> TypeKey {
        self.core.key
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn simple_name(&self) -> &str {
        &self.core.simple_name
    }

    pub fn modifiers(&self) -> Modifiers {
        self.core.modifiers
    }

    pub fn has_modifier(&self, modifier: Modifiers) -> bool {
        self.core.modifiers.intersects(modifier)
    }

    pub fn is_automatic(&self) -> bool {
        self.core.automatic
    }

    pub fn value_type_name(&self) -> &'static str {
        self.core.value_type_name
    }

    /// Whether the value type is `T`.
    pub fn is<T: 'static>(&self) -> bool {
        self.core.value_type == TypeId::of::<T>()
    }

    /// Recover the typed descriptor.
    pub fn downcast<T: RelationValue>(&self) -> Result<RelationType<T>> {
        let providers = Arc::clone(&self.typed)
            .downcast::<Providers<T>>()
            .map_err(|_| Error::TypeMismatch {
                expected: std::any::type_name::<T>().into(),
                got: self.core.value_type_name.into(),
            })?;
        Ok(RelationType {
            core: Arc::clone(&self.core),
            providers,
        })
    }

    pub(crate) fn frozen_name(&self) -> Option<&str> {
        self.core.qualified_name.get().map(String::as_str)
    }

    /// Freeze the qualified name. Returns false if a different name was
    /// frozen before.
    pub(crate) fn freeze_name(&self, qualified: &str) -> bool {
        let frozen = self.core.qualified_name.get_or_init(|| qualified.to_owned());
        frozen == qualified
    }
}

impl fmt::Debug for AnyRelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyRelationType")
            .field("key", &self.core.key)
            .field("name", &self.core.name())
            .field("value_type", &self.core.value_type_name)
            .finish()
    }
}

impl fmt::Display for AnyRelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.core.name())
    }
}

impl PartialEq for AnyRelationType {
    fn eq(&self, other: &Self) -> bool {
        self.core.key == other.core.key
    }
}

impl Eq for AnyRelationType {}

impl Hash for AnyRelationType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.core.key.hash(state);
    }
}

impl<T: RelationValue> From<&RelationType<T>> for AnyRelationType {
    fn from(rtype: &RelationType<T>) -> Self {
        rtype.erase()
    }
}

// ============================================================================
// TypeHandle: typed and untyped descriptors
// ============================================================================

/// Anything that designates a descriptor.
pub trait TypeHandle {
    fn type_key(&self) -> TypeKey;
    fn any_type(&self) -> AnyRelationType;
}

impl<T: RelationValue> TypeHandle for RelationType<T> {
    fn type_key(&self) -> TypeKey {
        self.core.key
    }

    fn any_type(&self) -> AnyRelationType {
        self.erase()
    }
}

impl TypeHandle for AnyRelationType {
    fn type_key(&self) -> TypeKey {
        self.core.key
    }

    fn any_type(&self) -> AnyRelationType {
        self.clone()
    }
}

/// Descriptors carry their own relations (scope TYPE), e.g. type listeners.
impl<T> Relatable for RelationType<T> {
    fn relations(&self) -> &Relations {
        &self.core.relations
    }
}

impl Relatable for AnyRelationType {
    fn relations(&self) -> &Relations {
        &self.core.relations
    }
}
