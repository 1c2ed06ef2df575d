//! Relation predicates for `get_all` / `has_relations`.
//!
//! The container only relies on [`RelationPredicate::test`]; any closure
//! over `&Relation` qualifies. The helpers here cover the common filters.

use crate::model::{Modifiers, Relation, TypeHandle};

/// A boolean test over relations.
pub trait RelationPredicate {
    fn test(&self, relation: &Relation) -> bool;
}

impl<F> RelationPredicate for F
where
    F: Fn(&Relation) -> bool,
{
    fn test(&self, relation: &Relation) -> bool {
        self(relation)
    }
}

/// Matches relations of `rtype`.
pub fn if_type<H: TypeHandle>(rtype: &H) -> impl RelationPredicate + use<H> {
    let key = rtype.type_key();
    move |relation: &Relation| relation.relation_type().key() == key
}

/// Matches relations whose type carries any of `modifiers`.
pub fn has_modifier(modifiers: Modifiers) -> impl RelationPredicate {
    move |relation: &Relation| relation.relation_type().has_modifier(modifiers)
}

pub fn and(a: impl RelationPredicate, b: impl RelationPredicate) -> impl RelationPredicate {
    move |relation: &Relation| a.test(relation) && b.test(relation)
}

pub fn or(a: impl RelationPredicate, b: impl RelationPredicate) -> impl RelationPredicate {
    move |relation: &Relation| a.test(relation) || b.test(relation)
}

pub fn not(p: impl RelationPredicate) -> impl RelationPredicate {
    move |relation: &Relation| !p.test(relation)
}
