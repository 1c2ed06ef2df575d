//! End-to-end tests for relation hosts.
//!
//! Covers get/set/init/delete, modifiers, predicates, listener scopes and
//! aliases through the public API only.

use std::sync::Arc;

use object_relations::predicate::{has_modifier, if_type, not};
use object_relations::{
    Error, EventType, Modifiers, Relatable, RelationType, Relations,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

// ============================================================================
// Helper: a host type that owns its relations.
// ============================================================================

struct Person {
    relations: Relations,
}

impl Person {
    fn new() -> Self {
        Self {
            relations: Relations::new(),
        }
    }
}

impl Relatable for Person {
    fn relations(&self) -> &Relations {
        &self.relations
    }
}

// ============================================================================
// 1. NAME / COUNT scenario
// ============================================================================

#[test]
fn test_name_count_scenario() {
    let name = RelationType::<String>::new("NAME");
    let count = RelationType::<i64>::builder("COUNT").default_value(0).build();
    let host = Person::new();

    assert_eq!(host.get(&count), Some(0));
    assert!(!host.has_relation(&count));

    host.set(&name, "x".to_string()).unwrap();
    let found = host.get_all(&if_type(&name));
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].target::<String>(), Some("x".to_string()));
}

// ============================================================================
// 2. Delete restores the default
// ============================================================================

#[test]
fn test_delete_then_default() {
    let count = RelationType::<i64>::builder("COUNT").default_value(0).build();
    let host = Person::new();

    host.set(&count, 42).unwrap();
    host.delete(&count).unwrap();
    assert_eq!(host.get(&count), Some(0));
    assert!(!host.has_relation(&count));
}

#[test]
fn test_delete_missing_is_noop() {
    let name = RelationType::<String>::new("NAME");
    let host = Person::new();
    host.delete(&name).unwrap();
    assert_eq!(host.get(&name), None);
}

// ============================================================================
// 3. Modifiers
// ============================================================================

#[test]
fn test_final_set_twice() {
    let id = RelationType::<u64>::builder("ID").modifiers(Modifiers::FINAL).build();
    let host = Person::new();

    host.set(&id, 1).unwrap();
    let err = host.set(&id, 2).unwrap_err();
    assert!(matches!(err, Error::ModifierViolation { modifier, .. } if modifier == Modifiers::FINAL));
    assert_eq!(host.get(&id), Some(1));
}

#[test]
fn test_private_relations_hidden() {
    let secret = RelationType::<String>::builder("SECRET")
        .modifiers(Modifiers::PRIVATE)
        .build();
    let name = RelationType::<String>::new("NAME");
    let host = Person::new();

    host.set(&secret, "s".into()).unwrap();
    host.set(&name, "n".into()).unwrap();

    assert_eq!(host.get(&secret), Some("s".to_string()));
    assert_eq!(host.get_all(&|_: &object_relations::Relation| true).len(), 1);
    assert!(!host.has_relations(&has_modifier(Modifiers::PRIVATE)));
    assert!(host.has_relations(&not(if_type(&secret))));
}

#[test]
fn test_init_uses_initial_value() {
    let tags = RelationType::<Vec<String>>::builder("TAGS")
        .initial_fn(|_| vec!["new".to_string()])
        .build();
    let host = Person::new();

    host.init(&tags).unwrap();
    assert_eq!(host.get(&tags), Some(vec!["new".to_string()]));
}

#[test]
fn test_init_without_providers_fails() {
    let name = RelationType::<String>::new("NAME");
    let host = Person::new();
    assert!(matches!(host.init(&name), Err(Error::InvalidArgument(_))));
}

// ============================================================================
// 4. Events across scopes
// ============================================================================

#[test]
fn test_events_across_scopes() {
    let name = RelationType::<String>::new("NAME");
    let host = Person::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&log);
    host.relations().add_listener(move |event| {
        sink.lock().push(("host", event.kind()));
        Ok(())
    });
    let sink = Arc::clone(&log);
    name.relations().add_listener(move |event| {
        sink.lock().push(("type", event.kind()));
        Ok(())
    });

    let relation = host.set(&name, "a".into()).unwrap();
    let sink = Arc::clone(&log);
    relation.relations().add_listener(move |event| {
        assert_eq!(event.previous::<String>(), Some("a".to_string()));
        sink.lock().push(("relation", event.kind()));
        Ok(())
    });
    host.set(&name, "b".into()).unwrap();

    assert_eq!(
        *log.lock(),
        vec![
            ("type", EventType::Add),
            ("host", EventType::Add),
            ("relation", EventType::Update),
            ("type", EventType::Update),
            ("host", EventType::Update),
        ]
    );
}

#[test]
fn test_listener_error_keeps_change() {
    let name = RelationType::<String>::new("NAME");
    let host = Person::new();
    host.relations()
        .add_listener(|_| Err(Error::InvalidArgument("no".into())));

    let err = host.set(&name, "kept".into()).unwrap_err();
    assert!(matches!(err, Error::Listener { .. }));
    assert_eq!(host.get(&name), Some("kept".to_string()));
}

#[test]
fn test_remove_listener() {
    let name = RelationType::<String>::new("NAME");
    let host = Person::new();
    let id = host.relations().add_listener(|_| Err(Error::InvalidArgument("no".into())));

    assert!(host.relations().remove_listener(id));
    assert!(!host.relations().remove_listener(id));
    host.set(&name, "ok".into()).unwrap();
}

// ============================================================================
// 5. Alias and view relations
// ============================================================================

#[test]
fn test_alias_writes_through() {
    let name = RelationType::<String>::new("NAME");
    let label = RelationType::<String>::new("LABEL");
    let host = Relations::new();
    host.set(&name, "a".into()).unwrap();

    host.alias(&name, &label).unwrap();
    host.set(&label, "b".into()).unwrap();
    assert_eq!(host.get(&name), Some("b".to_string()));
    assert_eq!(host.get(&label), Some("b".to_string()));
}

#[test]
fn test_view_is_readonly() {
    let name = RelationType::<String>::new("NAME");
    let shown = RelationType::<String>::new("SHOWN");
    let host = Relations::new();
    host.set(&name, "a".into()).unwrap();

    host.view(&name, &shown).unwrap();
    assert_eq!(host.get(&shown), Some("a".to_string()));
    assert!(matches!(
        host.set(&shown, "b".into()),
        Err(Error::ModifierViolation { .. })
    ));
}

#[test]
fn test_deleting_original_drops_alias() {
    let name = RelationType::<String>::new("NAME");
    let label = RelationType::<String>::new("LABEL");
    let host = Relations::new();
    host.set(&name, "a".into()).unwrap();
    host.alias(&name, &label).unwrap();

    host.delete(&name).unwrap();
    assert_eq!(host.get(&name), None);
    assert_eq!(host.get(&label), None);

    host.set(&label, "b".into()).unwrap();
    assert!(!host.has_relation(&name));
    assert_eq!(host.get(&label), Some("b".to_string()));
}

// ============================================================================
// 6. Concurrent writers
// ============================================================================

#[test]
fn test_concurrent_sets() {
    let count = RelationType::<u64>::builder("COUNT").default_value(0).build();
    let host = Relations::new();

    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..100 {
                    let _guard = host.lock();
                    let next = host.get(&count).unwrap_or_default() + 1;
                    host.set(&count, next).unwrap();
                }
            });
        }
    });
    assert_eq!(host.get(&count), Some(400));
}

// ============================================================================
// 7. Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_set_then_get(values in proptest::collection::vec(any::<i64>(), 1..16)) {
        let value = RelationType::<i64>::new("VALUE");
        let host = Relations::new();
        for v in values {
            host.set(&value, v).unwrap();
            prop_assert_eq!(host.get(&value), Some(v));
        }
    }

    #[test]
    fn prop_delete_then_default(default in any::<i32>(), written in any::<i32>()) {
        let value = RelationType::<i32>::builder("VALUE").default_value(default).build();
        let host = Relations::new();
        host.set(&value, written).unwrap();
        host.delete(&value).unwrap();
        prop_assert_eq!(host.get(&value), Some(default));
        prop_assert!(!host.has_relation(&value));
    }
}

// ============================================================================
// 8. Identifiers and enums serialize for diagnostics
// ============================================================================

#[test]
fn test_identifiers_serialize() {
    use object_relations::{AttachState, CouplingId, ListenerId, ListenerScope, TypeKey};

    let name = RelationType::<String>::new("NAME");
    let key: TypeKey = serde_json::from_str(&serde_json::to_string(&name.key()).unwrap()).unwrap();
    assert_eq!(key, name.key());

    assert_eq!(serde_json::to_string(&EventType::Update).unwrap(), r#""Update""#);
    assert_eq!(serde_json::to_string(&AttachState::Detached).unwrap(), r#""Detached""#);
    assert_eq!(serde_json::to_string(&ListenerScope::Relation).unwrap(), r#""Relation""#);
    assert_eq!(serde_json::to_string(&ListenerId(7)).unwrap(), "7");
    assert_eq!(serde_json::from_str::<CouplingId>("3").unwrap(), CouplingId(3));

    let modifiers = Modifiers::FINAL | Modifiers::PRIVATE;
    let json = serde_json::to_string(&modifiers).unwrap();
    assert_eq!(serde_json::from_str::<Modifiers>(&json).unwrap(), modifiers);
}
