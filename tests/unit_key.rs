/// Unit tests for Key type methods

use ferrous_runtime::{key_of, Key};
use std::any::TypeId;
use std::collections::HashSet;

#[test]
fn test_key_display_name_type() {
    let key = Key::Type(TypeId::of::<String>(), "alloc::string::String");
    assert_eq!(key.display_name(), "alloc::string::String");
    assert_eq!(key.to_string(), "alloc::string::String");
    assert_eq!(key.service_name(), None);
}

#[test]
fn test_key_display_name_named() {
    let key = Key::Named(TypeId::of::<u32>(), "u32", "database_port");
    assert_eq!(key.display_name(), "u32");
    assert_eq!(key.service_name(), Some("database_port"));
    assert_eq!(key.to_string(), "u32[database_port]");
}

#[test]
fn test_key_constructors_match_variants() {
    assert_eq!(Key::of::<u8>(), Key::Type(TypeId::of::<u8>(), "u8"));
    assert_eq!(Key::named::<u8>("x"), Key::Named(TypeId::of::<u8>(), "u8", "x"));
    assert_eq!(key_of::<u8>(), Key::of::<u8>());
    assert_eq!(Key::of::<u8>().type_id(), TypeId::of::<u8>());
}

#[test]
fn test_key_equality_ignores_display_name() {
    let a = Key::Type(TypeId::of::<u8>(), "u8");
    let b = Key::Type(TypeId::of::<u8>(), "alias");
    assert_eq!(a, b);

    let mut set = HashSet::new();
    set.insert(a);
    assert!(set.contains(&b));
}

#[test]
fn test_named_and_unnamed_keys_differ() {
    let plain = Key::of::<u8>();
    let named = Key::named::<u8>("x");
    let other = Key::named::<u8>("y");

    assert_ne!(plain, named);
    assert_ne!(named, other);
    assert!(plain < named);
    assert!(named < other);
}

#[test]
fn test_trait_object_keys() {
    trait Plugin {}
    let key = Key::of::<dyn Plugin>();
    assert!(key.display_name().starts_with("dyn "), "{}", key.display_name());
    assert_ne!(key, Key::of::<Box<dyn Plugin>>());
}
