/// Property-based tests for service registration
///
/// These tests use proptest to generate random inputs and verify invariants
/// that should hold for all valid service registrations.

use ferrous_runtime::{Container, DiError, Resolver};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct TestService {
    id: u32,
    name: String,
}

// Property: the first registration of a key wins; later ones are rejected
proptest! {
    #[test]
    fn duplicate_registrations_are_rejected(ids in prop::collection::vec(0u32..1000, 1..10)) {
        let container = Container::new();

        for (i, id) in ids.iter().enumerate() {
            let result = container.add_singleton(TestService {
                id: *id,
                name: format!("service_{}", id),
            });
            if i == 0 {
                prop_assert!(result.is_ok());
            } else {
                prop_assert!(matches!(result, Err(DiError::Duplicate(_))));
            }
        }

        container.build().unwrap();
        let resolved = container.get_required::<TestService>();
        prop_assert_eq!(resolved.id, ids[0]);
        prop_assert_eq!(&resolved.name, &format!("service_{}", ids[0]));
    }
}

// Property: with replace(), the last registration wins
proptest! {
    #[test]
    fn replace_last_registration_wins(ids in prop::collection::vec(0u32..1000, 1..10)) {
        let container = Container::new();

        for id in &ids {
            container
                .register::<TestService>()
                .replace()
                .instance(TestService { id: *id, name: format!("service_{}", id) })
                .unwrap();
        }
        prop_assert_eq!(container.len(), 1);

        container.build().unwrap();
        let resolved = container.get_required::<TestService>();
        prop_assert_eq!(resolved.id, *ids.last().unwrap());
    }
}

proptest! {
    #[test]
    fn singleton_factory_deterministic(seed in 0u32..1000) {
        let container = Container::new();
        container
            .add_singleton_factory::<TestService, _>(move |_| TestService {
                id: seed,
                name: format!("factory_{}", seed),
            })
            .unwrap();
        container.build().unwrap();

        // Multiple resolutions should return the same instance
        let service1 = container.get_required::<TestService>();
        let service2 = container.get_required::<TestService>();

        prop_assert!(Arc::ptr_eq(&service1, &service2));
        prop_assert_eq!(service1.id, seed);
    }
}

// Property: named registrations are independent keys, and duplicates among
// names are rejected exactly when the name repeats
proptest! {
    #[test]
    fn named_registrations_are_independent(names in prop::collection::vec("[a-z]{1,4}", 1..12)) {
        let container = Container::new();
        let mut seen = HashSet::new();

        for (i, name) in names.iter().enumerate() {
            let name: &'static str = Box::leak(name.clone().into_boxed_str());
            let result = container.add_named_singleton(name, i);
            prop_assert_eq!(result.is_ok(), seen.insert(name));
        }
        prop_assert_eq!(container.len(), seen.len());

        container.build().unwrap();
        for name in &seen {
            let first = names.iter().position(|n| n == name).unwrap();
            prop_assert_eq!(*container.get_named_required::<usize>(name), first);
        }
    }
}
