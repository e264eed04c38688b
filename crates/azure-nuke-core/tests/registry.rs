//! Registry validation and ordering

use azure_nuke_core::{Registration, Registry, RegistryError, ResourceScope};
use azure_nuke_test_utils::StaticHandler;
use std::sync::Arc;

fn reg(name: &str, deps: &[&str]) -> Registration {
    Registration::new(name, Arc::new(StaticHandler::new(name, 0)))
        .with_scope(ResourceScope::ResourceGroup)
        .depends_on(deps.iter().copied())
}

fn registry(entries: &[(&str, &[&str])]) -> Registry {
    let mut registry = Registry::new();
    for (name, deps) in entries {
        registry.register(reg(name, deps)).unwrap();
    }
    registry
}

#[test]
fn duplicate_name_is_rejected() {
    let mut registry = Registry::new();
    registry.register(reg("Disk", &[])).unwrap();

    let err = registry.register(reg("Disk", &[])).unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateName(ref n) if n == "Disk"));
    assert_eq!(registry.len(), 1);
}

#[test]
fn registration_without_scope_is_rejected() {
    let mut registry = Registry::new();
    let err = registry
        .register(Registration::new("Disk", Arc::new(StaticHandler::new("d", 0))))
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidRegistration { .. }));
    assert!(registry.is_empty());
}

#[test]
fn empty_name_is_rejected() {
    let mut registry = Registry::new();
    let err = registry.register(reg("", &[])).unwrap_err();
    assert!(matches!(err, RegistryError::InvalidRegistration { .. }));
}

#[test]
fn order_puts_dependencies_first() {
    let registry = registry(&[
        ("PublicIPAddress", &["NetworkInterface"]),
        ("NetworkInterface", &["VirtualMachine"]),
        ("VirtualMachine", &[]),
        ("StorageAccount", &[]),
    ]);
    let names = registry.list_names(ResourceScope::ResourceGroup);
    let order = registry
        .resolve_order(&names, ResourceScope::ResourceGroup)
        .unwrap();

    assert_eq!(
        order,
        [
            "VirtualMachine",
            "NetworkInterface",
            "PublicIPAddress",
            "StorageAccount"
        ]
    );
}

#[test]
fn cycle_names_exactly_its_members() {
    let registry = registry(&[
        ("A", &["B"]),
        ("B", &["A"]),
        ("C", &["A"]),
        ("D", &[]),
    ]);
    let err = registry
        .resolve_order(&["A", "B", "C", "D"], ResourceScope::ResourceGroup)
        .unwrap_err();

    assert_eq!(
        err.cycle_members().unwrap(),
        ["A".to_string(), "B".to_string()]
    );
}

#[test]
fn unknown_name_is_rejected() {
    let registry = registry(&[("A", &[])]);
    let err = registry
        .resolve_order(&["A", "Nope"], ResourceScope::ResourceGroup)
        .unwrap_err();
    assert!(matches!(err, RegistryError::UnknownType(ref n) if n == "Nope"));
}
