//! # Type Registry
//!
//! Descriptors are declared in a [`Namespace`] and registered explicitly. A
//! registry assigns each declared slot the qualified name
//! `<namespace id>.<slot>` and freezes it on the descriptor. Registration is
//! all-or-nothing and idempotent for a namespace registered before.

use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;
use tracing::debug;

use crate::coupling::COUPLINGS;
use crate::event::{HOST_LISTENERS, RELATION_LISTENERS, TYPE_LISTENERS};
use crate::model::{AnyRelationType, TypeHandle};
use crate::{Error, Result};

/// Namespace of the reserved descriptors.
pub const CORE_NAMESPACE: &str = "object_relations";

// ============================================================================
// Namespace
// ============================================================================

/// A named group of declared descriptor slots.
#[derive(Debug, Clone)]
pub struct Namespace {
    id: String,
    slots: Vec<(String, AnyRelationType)>,
}

impl Namespace {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            slots: Vec::new(),
        }
    }

    /// Declare `rtype` under its simple name.
    pub fn declare(self, rtype: &impl TypeHandle) -> Self {
        let any = rtype.any_type();
        let slot = any.simple_name().to_owned();
        self.declare_as(slot, &any)
    }

    pub fn declare_as(mut self, slot: impl Into<String>, rtype: &impl TypeHandle) -> Self {
        self.slots.push((slot.into(), rtype.any_type()));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The descriptor declared under `slot`.
    pub fn slot(&self, slot: &str) -> Option<&AnyRelationType> {
        self.slots
            .iter()
            .find(|(name, _)| name == slot)
            .map(|(_, rtype)| rtype)
    }

    pub fn slots(&self) -> impl Iterator<Item = (&str, &AnyRelationType)> {
        self.slots.iter().map(|(name, rtype)| (name.as_str(), rtype))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn qualify(&self, slot: &str) -> String {
        format!("{}.{}", self.id, slot)
    }
}

/// The reserved listener and coupling descriptors.
pub fn core_namespace() -> Namespace {
    Namespace::new(CORE_NAMESPACE)
        .declare(&*HOST_LISTENERS)
        .declare(&*TYPE_LISTENERS)
        .declare(&*RELATION_LISTENERS)
        .declare(&*COUPLINGS)
}

// ============================================================================
// TypeRegistry
// ============================================================================

/// Maps qualified names to descriptors.
#[derive(Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<String, AnyRelationType>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry already holding the reserved descriptors.
    pub fn with_core() -> Result<Self> {
        let registry = Self::new();
        registry.register(&core_namespace())?;
        Ok(registry)
    }

    /// Register every slot of `namespace`.
    ///
    /// Fails without registering anything if a slot name is empty or
    /// declared twice, if its qualified name belongs to another descriptor,
    /// or if the descriptor was already frozen under a different name.
    pub fn register(&self, namespace: &Namespace) -> Result<()> {
        if namespace.id().is_empty() {
            return Err(Error::Registration("namespace id must not be empty".into()));
        }

        let mut types = self.types.write();
        let mut seen = HashSet::new();
        let mut pending = Vec::new();

        for (slot, rtype) in namespace.slots() {
            if slot.is_empty() {
                return Err(Error::Registration(format!(
                    "empty slot name in namespace {}",
                    namespace.id()
                )));
            }
            let qualified = namespace.qualify(slot);
            if !seen.insert(qualified.clone()) {
                return Err(Error::Registration(format!("{qualified} is declared twice")));
            }
            match types.get(&qualified) {
                Some(existing) if existing == rtype => continue,
                Some(_) => {
                    return Err(Error::Registration(format!(
                        "{qualified} is already registered for another relation type"
                    )));
                }
                None => {}
            }
            if let Some(frozen) = rtype.frozen_name() {
                if frozen != qualified {
                    return Err(Error::Registration(format!(
                        "relation type {frozen} cannot be registered again as {qualified}"
                    )));
                }
            }
            pending.push((qualified, rtype.clone()));
        }

        for (qualified, rtype) in pending {
            if !rtype.freeze_name(&qualified) {
                return Err(Error::Registration(format!(
                    "relation type {} was registered concurrently under another name",
                    rtype.name()
                )));
            }
            debug!(name = %qualified, value_type = rtype.value_type_name(), "relation type registered");
            types.insert(qualified, rtype);
        }
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<AnyRelationType> {
        self.types.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.read().contains_key(name)
    }

    /// All descriptors registered under `namespace_id`, ordered by name.
    pub fn types_in(&self, namespace_id: &str) -> Vec<AnyRelationType> {
        let prefix = format!("{namespace_id}.");
        let mut found: Vec<(String, AnyRelationType)> = self
            .types
            .read()
            .iter()
            .filter(|(name, _)| name.starts_with(&prefix))
            .map(|(name, rtype)| (name.clone(), rtype.clone()))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found.into_iter().map(|(_, rtype)| rtype).collect()
    }

    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }
}
