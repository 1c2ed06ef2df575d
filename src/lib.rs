//! # object-relations: Typed, Observable Object Relations
//!
//! Typed attributes ("relations") attached to arbitrary host objects, with
//! change events, reactive relation types, explicit couplings to external
//! endpoints and path-addressed hierarchical object spaces.
//!
//! ## Design Principles
//!
//! 1. **Descriptor-first**: a `RelationType<T>` fixes the value type, the
//!    modifiers and the default/initial providers of a relation
//! 2. **One container**: hosts, descriptors and relations all own the same
//!    `Relations` container, so meta-relations and listeners need no
//!    separate machinery
//! 3. **Synchronous events**: listeners run on the mutating thread, after
//!    the change, under the host's reentrant lock
//! 4. **Explicit registration**: qualified names come from a `TypeRegistry`
//!    and are frozen once assigned
//!
//! ## Quick Start
//!
//! ```rust
//! use object_relations::{predicate::if_type, RelationType, Relations};
//!
//! # fn example() -> object_relations::Result<()> {
//! let name = RelationType::<String>::new("NAME");
//! let count = RelationType::<u32>::builder("COUNT").default_value(0).build();
//!
//! let host = Relations::new();
//! host.set(&name, "Ada".to_string())?;
//!
//! assert_eq!(host.get(&name), Some("Ada".to_string()));
//! assert_eq!(host.get(&count), Some(0));
//! assert_eq!(host.get_all(&if_type(&name)).len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Layers
//!
//! | Module | Contents |
//! |--------|----------|
//! | `model` | Descriptors, relations, the relation container |
//! | `registry` | Namespaces and qualified-name registration |
//! | `event` | Listener scopes and event dispatch |
//! | `automatic` | Reactive relation types |
//! | `coupling` | Pull/push synchronization with external endpoints |
//! | `space` | Hierarchical, path-addressed object spaces |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod registry;
pub mod event;
pub mod automatic;
pub mod coupling;
pub mod space;
pub mod predicate;

// ============================================================================
// Re-exports: Model
// ============================================================================

pub use model::{
    AnyRelationType, HostGuard, Modifiers, Relatable, Relation, RelationKind, RelationType,
    RelationValue, Relations, TypeBuilder, TypeHandle, TypeKey, WeakRelations,
};

// ============================================================================
// Re-exports: Registry, events, automatic types
// ============================================================================

pub use registry::{Namespace, TypeRegistry};
pub use event::{EventType, Listener, ListenerId, ListenerScope, RelationEvent};
pub use automatic::{AttachState, AutomaticBehavior, AutomaticScope};

// ============================================================================
// Re-exports: Couplings and spaces
// ============================================================================

pub use coupling::{Coupling, CouplingId};
pub use space::{ObjectSpace, SpaceConfig, SpacePath};
pub use predicate::RelationPredicate;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Registration error: {0}")]
    Registration(String),

    #[error("Modifier violation: relation {relation} is {modifier:?}")]
    ModifierViolation { relation: String, modifier: Modifiers },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Cannot resolve path {path} at segment '{segment}': {reason}")]
    PathResolution {
        path: String,
        segment: String,
        reason: String,
    },

    #[error("Listener failed on relation {relation}: {source}")]
    Listener {
        relation: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Type error: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },
}

pub type Result<T> = std::result::Result<T, Error>;
