//! Provider registration state and the startup-built routing table.
//!
//! Resolution precedence for any (namespace, class) target:
//!
//! 1. control providers, registered against fixed pairs when the table is
//!    built and never changed afterwards;
//! 2. externally registered providers, looked up in the registration table
//!    (read-mostly state owned by the registration service, not by us);
//! 3. the repository itself, when configured as the default instance
//!    provider.
//!
//! The table is assembled once at service start-up and handed to the
//! dispatcher by reference; there is no lazily-populated global.

use std::collections::HashMap;

use cimom_types::{CimName, Namespace};
use serde::{Deserialize, Serialize};

/// One row of the provider registration table:
/// (namespace, class, module, provider, service id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRegistration {
    pub namespace: Namespace,
    pub class_name: CimName,
    pub module_name: String,
    pub provider_name: String,
    pub service_id: u64,
}

/// The registration table consumed by routing.
///
/// Read-mostly external state: the dispatcher queries it but a registration
/// service owns its contents.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    by_target: HashMap<(Namespace, CimName), ProviderRegistration>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the registration for its (namespace, class) pair.
    pub fn register(&mut self, registration: ProviderRegistration) {
        self.by_target.insert(
            (
                registration.namespace.clone(),
                registration.class_name.clone(),
            ),
            registration,
        );
    }

    #[must_use]
    pub fn lookup(&self, namespace: &Namespace, class: &CimName) -> Option<&ProviderRegistration> {
        self.by_target.get(&(namespace.clone(), class.clone()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_target.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_target.is_empty()
    }
}

/// Where a request should be forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderTarget {
    /// A built-in control provider, addressed by name.
    Control { provider_name: String },
    /// An externally registered provider.
    Registered(ProviderRegistration),
    /// The repository acting as the default instance provider.
    Repository,
}

impl ProviderTarget {
    /// Stable identity used as the worker-channel key.
    #[must_use]
    pub fn worker_key(&self) -> String {
        match self {
            Self::Control { provider_name } => format!("control:{provider_name}"),
            Self::Registered(reg) => format!("{}:{}", reg.module_name, reg.provider_name),
            Self::Repository => "repository".to_owned(),
        }
    }
}

/// The routing table: control pairs, the registration view and the
/// repository-default switch, frozen at start-up.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    control: HashMap<(Namespace, CimName), String>,
    registry: ProviderRegistry,
    repository_is_default: bool,
}

impl RoutingTable {
    #[must_use]
    pub fn builder() -> RoutingTableBuilder {
        RoutingTableBuilder {
            control: HashMap::new(),
            registry: ProviderRegistry::new(),
            repository_is_default: false,
        }
    }

    /// Resolve the provider for one (namespace, class) target.
    #[must_use]
    pub fn resolve(&self, namespace: &Namespace, class: &CimName) -> Option<ProviderTarget> {
        if let Some(name) = self.control.get(&(namespace.clone(), class.clone())) {
            return Some(ProviderTarget::Control {
                provider_name: name.clone(),
            });
        }
        if let Some(reg) = self.registry.lookup(namespace, class) {
            return Some(ProviderTarget::Registered(reg.clone()));
        }
        if self.repository_is_default {
            return Some(ProviderTarget::Repository);
        }
        None
    }

    /// Whether a registered (non-control, non-repository) provider serves the
    /// target. Used by enumeration fan-out to decide which subclasses the
    /// repository must cover.
    #[must_use]
    pub fn has_registered_provider(&self, namespace: &Namespace, class: &CimName) -> bool {
        self.control.contains_key(&(namespace.clone(), class.clone()))
            || self.registry.lookup(namespace, class).is_some()
    }

    #[must_use]
    pub fn repository_is_default(&self) -> bool {
        self.repository_is_default
    }
}

/// Start-up assembly for [`RoutingTable`].
#[derive(Debug)]
pub struct RoutingTableBuilder {
    control: HashMap<(Namespace, CimName), String>,
    registry: ProviderRegistry,
    repository_is_default: bool,
}

impl RoutingTableBuilder {
    /// Register a control provider for a fixed (class, namespace) pair.
    #[must_use]
    pub fn control_provider(
        mut self,
        namespace: impl Into<Namespace>,
        class: impl Into<CimName>,
        provider_name: impl Into<String>,
    ) -> Self {
        self.control
            .insert((namespace.into(), class.into()), provider_name.into());
        self
    }

    /// Attach the registration table snapshot.
    #[must_use]
    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Let the repository serve classes without a registered provider.
    #[must_use]
    pub fn repository_as_default_provider(mut self, yes: bool) -> Self {
        self.repository_is_default = yes;
        self
    }

    #[must_use]
    pub fn build(self) -> RoutingTable {
        RoutingTable {
            control: self.control,
            registry: self.registry,
            repository_is_default: self.repository_is_default,
        }
    }
}
