//! # Relation Model
//!
//! Descriptors, relation slots and the relation container that every
//! relatable host owns. These types are shared by every other layer:
//! events, automatic types, couplings and object spaces all operate on
//! `Relations` and `Relation`.

pub mod relation_type;
pub mod relation;
pub mod relations;

pub use relation_type::{
    AnyRelationType, Modifiers, RelationType, RelationValue, TypeBuilder, TypeHandle, TypeKey,
};
pub use relation::{Relation, RelationKind};
pub use relations::{HostGuard, Relatable, Relations, WeakRelations};
