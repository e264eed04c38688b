//! Built-in resource types and their removal dependencies
//!
//! A type listed in another's `depends_on` is scanned, and therefore
//! removed, first: virtual machines go before the disks and NICs they hold,
//! NICs before the IPs, security groups and networks they reference.

use super::{ArmCollectionHandler, CollectionPath, collection_scope};
use crate::arm::ArmClient;
use crate::error::RegistryError;
use crate::registry::{Registration, Registry};
use std::sync::Arc;

/// A built-in ARM-backed resource type
#[derive(Debug, Clone, Copy)]
pub struct BuiltinType {
    pub name: &'static str,
    pub collection: CollectionPath,
    pub api_version: &'static str,
    pub depends_on: &'static [&'static str],
}

pub const BUILTIN: &[BuiltinType] = &[
    BuiltinType {
        name: "VirtualMachine",
        collection: CollectionPath::Provider("Microsoft.Compute/virtualMachines"),
        api_version: "2024-03-01",
        depends_on: &[],
    },
    BuiltinType {
        name: "Disk",
        collection: CollectionPath::Provider("Microsoft.Compute/disks"),
        api_version: "2023-04-02",
        depends_on: &["VirtualMachine"],
    },
    BuiltinType {
        name: "NetworkInterface",
        collection: CollectionPath::Provider("Microsoft.Network/networkInterfaces"),
        api_version: "2023-09-01",
        depends_on: &["VirtualMachine"],
    },
    BuiltinType {
        name: "PublicIPAddress",
        collection: CollectionPath::Provider("Microsoft.Network/publicIPAddresses"),
        api_version: "2023-09-01",
        depends_on: &["NetworkInterface"],
    },
    BuiltinType {
        name: "NetworkSecurityGroup",
        collection: CollectionPath::Provider("Microsoft.Network/networkSecurityGroups"),
        api_version: "2023-09-01",
        depends_on: &["NetworkInterface"],
    },
    BuiltinType {
        name: "VirtualNetwork",
        collection: CollectionPath::Provider("Microsoft.Network/virtualNetworks"),
        api_version: "2023-09-01",
        depends_on: &["NetworkInterface"],
    },
    BuiltinType {
        name: "StorageAccount",
        collection: CollectionPath::Provider("Microsoft.Storage/storageAccounts"),
        api_version: "2023-01-01",
        depends_on: &[],
    },
    BuiltinType {
        name: "ResourceGroup",
        collection: CollectionPath::ResourceGroups,
        api_version: azure_nuke_common::defaults::RESOURCE_GROUPS_API_VERSION,
        depends_on: &[],
    },
];

/// Register every built-in type against `client`
pub fn register_builtin(registry: &mut Registry, client: &ArmClient) -> Result<(), RegistryError> {
    for builtin in BUILTIN {
        let handler = ArmCollectionHandler::new(
            client.clone(),
            builtin.collection,
            builtin.api_version,
        );
        registry.register(
            Registration::new(builtin.name, Arc::new(handler))
                .with_scope(collection_scope(builtin.collection))
                .depends_on(builtin.depends_on.iter().copied()),
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Audience, StaticTokenProvider};
    use azure_nuke_common::ResourceScope;

    fn registry() -> Registry {
        let client = ArmClient::new(Arc::new(
            StaticTokenProvider::new().with_token(Audience::Management, "t"),
        ));
        let mut registry = Registry::new();
        register_builtin(&mut registry, &client).unwrap();
        registry
    }

    #[test]
    fn test_builtin_registers_every_type() {
        let registry = registry();
        assert_eq!(registry.len(), BUILTIN.len());
        assert_eq!(
            registry.list_names(ResourceScope::Subscription),
            ["ResourceGroup"]
        );
        assert!(registry.list_names(ResourceScope::Tenant).is_empty());
    }

    #[test]
    fn test_builtin_order_respects_dependencies() {
        let registry = registry();
        let names = registry.list_names(ResourceScope::ResourceGroup);
        let order = registry
            .resolve_order(&names, ResourceScope::ResourceGroup)
            .unwrap();
        let pos = |name: &str| order.iter().position(|n| n == name).unwrap();

        assert!(pos("VirtualMachine") < pos("Disk"));
        assert!(pos("VirtualMachine") < pos("NetworkInterface"));
        for after_nic in ["PublicIPAddress", "NetworkSecurityGroup", "VirtualNetwork"] {
            assert!(pos("NetworkInterface") < pos(after_nic), "{after_nic}");
        }
    }

    #[test]
    fn test_dependencies_are_builtin() {
        for builtin in BUILTIN {
            for dep in builtin.depends_on {
                assert!(
                    BUILTIN.iter().any(|b| b.name == *dep),
                    "{} depends on unknown {dep}",
                    builtin.name
                );
            }
        }
    }
}
