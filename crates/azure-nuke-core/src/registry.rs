//! Resource-type registry with scope and dependency metadata
//!
//! The registry is populated once at startup through explicit
//! [`Registry::register`] calls and is treated as immutable afterwards; it is
//! shared behind an `Arc` by the scanner and the run loop.
//!
//! Dependencies are validated lazily in [`Registry::resolve_order`] because
//! registration order is not guaranteed.

use crate::error::RegistryError;
use crate::resource::ResourceHandler;
use azure_nuke_common::ResourceScope;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Input to [`Registry::register`]
#[derive(Clone)]
pub struct Registration {
    name: String,
    scope: Option<ResourceScope>,
    handler: Arc<dyn ResourceHandler>,
    depends_on: Vec<String>,
}

impl Registration {
    pub fn new(name: impl Into<String>, handler: Arc<dyn ResourceHandler>) -> Self {
        Self {
            name: name.into(),
            scope: None,
            handler,
            depends_on: Vec::new(),
        }
    }

    pub fn with_scope(mut self, scope: ResourceScope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Types that must be fully listed before this one starts.
    ///
    /// Duplicates are ignored; first occurrence wins.
    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into();
            if !self.depends_on.contains(&name) {
                self.depends_on.push(name);
            }
        }
        self
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("depends_on", &self.depends_on)
            .finish_non_exhaustive()
    }
}

/// A validated registration
#[derive(Clone)]
pub struct RegisteredType {
    name: String,
    scope: ResourceScope,
    handler: Arc<dyn ResourceHandler>,
    depends_on: Vec<String>,
}

impl RegisteredType {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> ResourceScope {
        self.scope
    }

    pub fn handler(&self) -> &Arc<dyn ResourceHandler> {
        &self.handler
    }

    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }
}

impl fmt::Debug for RegisteredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredType")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("depends_on", &self.depends_on)
            .finish_non_exhaustive()
    }
}

/// Registry of resource types, arena-indexed by name
#[derive(Default, Debug)]
pub struct Registry {
    entries: Vec<RegisteredType>,
    index: HashMap<String, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a registration.
    ///
    /// Fails on a duplicate name, an empty name, or a missing scope.
    pub fn register(&mut self, registration: Registration) -> Result<(), RegistryError> {
        let Registration {
            name,
            scope,
            handler,
            depends_on,
        } = registration;

        if name.trim().is_empty() {
            return Err(RegistryError::InvalidRegistration {
                name,
                reason: "name must not be empty",
            });
        }
        let Some(scope) = scope else {
            return Err(RegistryError::InvalidRegistration {
                name,
                reason: "scope must be set",
            });
        };
        if self.index.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }

        self.index.insert(name.clone(), self.entries.len());
        self.entries.push(RegisteredType {
            name,
            scope,
            handler,
            depends_on,
        });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredType> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All registrations in registration order
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredType> {
        self.entries.iter()
    }

    /// Names registered at `scope`, in registration order
    pub fn list_names(&self, scope: ResourceScope) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.scope == scope)
            .map(|e| e.name.clone())
            .collect()
    }

    /// Reorder `names` so every type comes after its in-set dependencies.
    ///
    /// Names registered at a different scope are dropped; duplicates keep
    /// their first position. Types with no ordering constraint between them
    /// keep their relative input order, so the result is deterministic.
    ///
    /// Fails with [`RegistryError::DependencyCycle`] naming every type that
    /// sits on a cycle.
    pub fn resolve_order<S: AsRef<str>>(
        &self,
        names: &[S],
        scope: ResourceScope,
    ) -> Result<Vec<String>, RegistryError> {
        let mut selected: Vec<&RegisteredType> = Vec::with_capacity(names.len());
        let mut seen = HashSet::new();
        for name in names {
            let name = name.as_ref();
            let entry = self
                .get(name)
                .ok_or_else(|| RegistryError::UnknownType(name.to_string()))?;
            if entry.scope == scope && seen.insert(name) {
                selected.push(entry);
            }
        }

        for entry in &selected {
            if let Some(missing) = entry.depends_on.iter().find(|d| !self.contains(d)) {
                return Err(RegistryError::UnknownDependency {
                    name: entry.name.clone(),
                    dependency: missing.clone(),
                });
            }
        }

        let position: HashMap<&str, usize> = selected
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name.as_str(), i))
            .collect();

        // Edges run dependency -> dependent.
        let n = selected.len();
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut in_degree = vec![0usize; n];
        for (i, entry) in selected.iter().enumerate() {
            for dep in &entry.depends_on {
                if let Some(&d) = position.get(dep.as_str()) {
                    successors[d].push(i);
                    in_degree[i] += 1;
                }
            }
        }

        // Kahn's algorithm, always releasing the earliest ready position.
        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut ordered = Vec::with_capacity(n);
        while let Some(i) = ready.pop_first() {
            ordered.push(i);
            for &s in &successors[i] {
                in_degree[s] -= 1;
                if in_degree[s] == 0 {
                    ready.insert(s);
                }
            }
        }

        if ordered.len() < n {
            let mut remaining = vec![true; n];
            for &i in &ordered {
                remaining[i] = false;
            }
            let members = cycle_members(&successors, &remaining)
                .into_iter()
                .map(|i| selected[i].name.clone())
                .collect();
            return Err(RegistryError::DependencyCycle { members });
        }

        Ok(ordered
            .into_iter()
            .map(|i| selected[i].name.clone())
            .collect())
    }
}

/// Nodes that lie on a cycle, in ascending position order.
///
/// Kahn's leftovers also contain nodes merely downstream of (or between)
/// cycles; strongly connected components separate the two.
fn cycle_members(successors: &[Vec<usize>], remaining: &[bool]) -> Vec<usize> {
    let mut tarjan = Tarjan::new(successors, remaining);
    for v in 0..successors.len() {
        if remaining[v] && tarjan.index[v].is_none() {
            tarjan.visit(v);
        }
    }

    let mut members: Vec<usize> = tarjan
        .components
        .into_iter()
        .filter(|c| c.len() > 1 || successors[c[0]].contains(&c[0]))
        .flatten()
        .collect();
    members.sort_unstable();
    members
}

struct Tarjan<'a> {
    successors: &'a [Vec<usize>],
    alive: &'a [bool],
    index: Vec<Option<usize>>,
    low: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    next: usize,
    components: Vec<Vec<usize>>,
}

impl<'a> Tarjan<'a> {
    fn new(successors: &'a [Vec<usize>], alive: &'a [bool]) -> Self {
        let n = successors.len();
        Self {
            successors,
            alive,
            index: vec![None; n],
            low: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            next: 0,
            components: Vec::new(),
        }
    }

    fn visit(&mut self, v: usize) {
        self.index[v] = Some(self.next);
        self.low[v] = self.next;
        self.next += 1;
        self.stack.push(v);
        self.on_stack[v] = true;

        let successors = self.successors;
        for &w in &successors[v] {
            if !self.alive[w] {
                continue;
            }
            match self.index[w] {
                None => {
                    self.visit(w);
                    self.low[v] = self.low[v].min(self.low[w]);
                }
                Some(iw) if self.on_stack[w] => {
                    self.low[v] = self.low[v].min(iw);
                }
                Some(_) => {}
            }
        }

        if self.index[v] == Some(self.low[v]) {
            let mut component = Vec::new();
            while let Some(w) = self.stack.pop() {
                self.on_stack[w] = false;
                component.push(w);
                if w == v {
                    break;
                }
            }
            self.components.push(component);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::resource::{Resource, ScopeContext};
    use async_trait::async_trait;

    struct NoopHandler;

    #[async_trait]
    impl ResourceHandler for NoopHandler {
        async fn list(&self, _ctx: &ScopeContext) -> Result<Vec<Box<dyn Resource>>, HandlerError> {
            Ok(Vec::new())
        }
    }

    fn reg(name: &str, deps: &[&str]) -> Registration {
        Registration::new(name, Arc::new(NoopHandler))
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

    fn assert_respects_dependencies(registry: &Registry, order: &[String]) {
        for (i, name) in order.iter().enumerate() {
            for dep in registry.get(name).unwrap().depends_on() {
                if let Some(j) = order.iter().position(|n| n == dep) {
                    assert!(j < i, "{dep} must come before {name} in {order:?}");
                }
            }
        }
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = Registry::new();
        registry.register(reg("Disk", &[])).unwrap();
        let err = registry.register(reg("Disk", &[])).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(ref n) if n == "Disk"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_missing_scope_rejected() {
        let mut registry = Registry::new();
        let err = registry
            .register(Registration::new("Disk", Arc::new(NoopHandler)))
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidRegistration { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut registry = Registry::new();
        let err = registry.register(reg("  ", &[])).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidRegistration { .. }));
    }

    #[test]
    fn test_list_names_by_scope() {
        let mut registry = registry(&[("Disk", &[]), ("VirtualMachine", &[])]);
        registry
            .register(
                Registration::new("ResourceGroup", Arc::new(NoopHandler))
                    .with_scope(ResourceScope::Subscription),
            )
            .unwrap();

        assert_eq!(
            registry.list_names(ResourceScope::ResourceGroup),
            vec!["Disk", "VirtualMachine"]
        );
        assert_eq!(
            registry.list_names(ResourceScope::Subscription),
            vec!["ResourceGroup"]
        );
        assert!(registry.list_names(ResourceScope::Tenant).is_empty());
    }

    #[test]
    fn test_chain_is_ordered() {
        let registry = registry(&[("C", &["B"]), ("B", &["A"]), ("A", &[])]);
        let order = registry
            .resolve_order(&["C", "B", "A"], ResourceScope::ResourceGroup)
            .unwrap();
        assert_eq!(order, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_independent_names_keep_input_order() {
        let registry = registry(&[("X", &[]), ("Y", &[]), ("Z", &[])]);
        let order = registry
            .resolve_order(&["Z", "X", "Y"], ResourceScope::ResourceGroup)
            .unwrap();
        assert_eq!(order, vec!["Z", "X", "Y"]);
    }

    #[test]
    fn test_diamond_respects_all_edges() {
        let registry = registry(&[
            ("Top", &["Left", "Right"]),
            ("Left", &["Base"]),
            ("Right", &["Base"]),
            ("Base", &[]),
            ("Loose", &[]),
        ]);
        let names = ["Top", "Left", "Right", "Base", "Loose"];
        let order = registry
            .resolve_order(&names, ResourceScope::ResourceGroup)
            .unwrap();
        assert_eq!(order.len(), names.len());
        assert_respects_dependencies(&registry, &order);
        // Deterministic for identical input
        let again = registry
            .resolve_order(&names, ResourceScope::ResourceGroup)
            .unwrap();
        assert_eq!(order, again);
    }

    #[test]
    fn test_dependencies_outside_the_set_are_ignored() {
        let registry = registry(&[("Disk", &["VirtualMachine"]), ("VirtualMachine", &[])]);
        let order = registry
            .resolve_order(&["Disk"], ResourceScope::ResourceGroup)
            .unwrap();
        assert_eq!(order, vec!["Disk"]);
    }

    #[test]
    fn test_other_scope_names_are_dropped() {
        let mut registry = registry(&[("Disk", &[])]);
        registry
            .register(
                Registration::new("Application", Arc::new(NoopHandler))
                    .with_scope(ResourceScope::Tenant),
            )
            .unwrap();
        let order = registry
            .resolve_order(&["Application", "Disk"], ResourceScope::ResourceGroup)
            .unwrap();
        assert_eq!(order, vec!["Disk"]);
    }

    #[test]
    fn test_duplicates_in_input_collapse() {
        let registry = registry(&[("A", &[]), ("B", &["A"])]);
        let order = registry
            .resolve_order(&["B", "A", "B"], ResourceScope::ResourceGroup)
            .unwrap();
        assert_eq!(order, vec!["A", "B"]);
    }

    #[test]
    fn test_unknown_name_rejected() {
        let registry = registry(&[("A", &[])]);
        let err = registry
            .resolve_order(&["A", "Nope"], ResourceScope::ResourceGroup)
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownType(ref n) if n == "Nope"));
    }

    #[test]
    fn test_unknown_dependency_rejected_at_resolution() {
        // Registration itself succeeds: validation is lazy.
        let registry = registry(&[("A", &["Ghost"])]);
        let err = registry
            .resolve_order(&["A"], ResourceScope::ResourceGroup)
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::UnknownDependency { ref name, ref dependency }
                if name == "A" && dependency == "Ghost"
        ));
    }

    #[test]
    fn test_cycle_reports_exact_members() {
        // A <-> B is a cycle; C depends on the cycle but is not part of it.
        let registry = registry(&[("A", &["B"]), ("B", &["A"]), ("C", &["A"]), ("D", &[])]);
        let err = registry
            .resolve_order(&["A", "B", "C", "D"], ResourceScope::ResourceGroup)
            .unwrap_err();
        assert_eq!(err.cycle_members(), Some(&["A".to_string(), "B".to_string()][..]));
    }

    #[test]
    fn test_node_between_two_cycles_is_not_a_member() {
        let registry = registry(&[
            ("A", &["B"]),
            ("B", &["A"]),
            ("X", &["A"]),
            ("C", &["X", "D"]),
            ("D", &["C"]),
        ]);
        let err = registry
            .resolve_order(&["A", "B", "X", "C", "D"], ResourceScope::ResourceGroup)
            .unwrap_err();
        let members = err.cycle_members().unwrap();
        assert_eq!(members, ["A", "B", "C", "D"]);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let registry = registry(&[("A", &["A"]), ("B", &[])]);
        let err = registry
            .resolve_order(&["A", "B"], ResourceScope::ResourceGroup)
            .unwrap_err();
        assert_eq!(err.cycle_members(), Some(&["A".to_string()][..]));
    }
}
