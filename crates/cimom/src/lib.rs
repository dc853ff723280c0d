//! The CIM object-manager facade.
//!
//! Wires the dispatcher, routing table, repository and providers into one
//! [`CimServer`], and keeps the process-wide cache of built class
//! descriptors. Re-exports the public surface of the underlying crates so
//! embedders depend on this crate alone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

pub mod repository;

pub use cimom_dispatch::{
    Dispatcher, DispatcherConfig, OperationContext, OperationRequest, OperationResponse,
    OperationResult, Provider, ProviderRegistration, ProviderRegistry, ProviderTarget, Repository,
    RequestEnvelope, ResponsePayload, RoutingTable,
};
pub use cimom_error::{CimError, CimStatusCode};
pub use cimom_scmo::{PropertyGet, ScmoClass, ScmoInstance, SetPropertyError, SharedClass};
pub use cimom_types::{
    CimClass, CimDateTime, CimInstance, CimName, CimObjectPath, CimProperty, CimQualifier,
    CimType, CimValue, CimValueArray, KeyBindingValue, Namespace,
};
pub use repository::MemoryRepository;

/// Process-wide cache of built class descriptors, keyed by
/// (namespace, class). Built once per key, shared behind `Arc` afterwards.
#[derive(Debug, Default)]
pub struct ClassCache {
    inner: RwLock<HashMap<(Namespace, CimName), SharedClass>>,
}

impl ClassCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached descriptor, building it on first use.
    #[must_use]
    pub fn get_or_build(&self, namespace: &Namespace, class: &CimClass) -> SharedClass {
        let key = (namespace.clone(), class.class_name.clone());
        if let Some(hit) = self.inner.read().get(&key) {
            return Arc::clone(hit);
        }
        let built = Arc::new(ScmoClass::build(class, Some(namespace.as_str())));
        let mut cache = self.inner.write();
        // Another thread may have built it while we were outside the lock;
        // keep the first one so every holder shares one descriptor.
        Arc::clone(
            cache
                .entry(key)
                .or_insert_with(|| {
                    debug!(
                        namespace = namespace.as_str(),
                        class = class.class_name.as_str(),
                        "built class descriptor"
                    );
                    built
                }),
        )
    }

    /// Number of cached descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// The assembled object manager.
pub struct CimServer {
    dispatcher: Dispatcher,
    message_ids: AtomicU64,
}

impl CimServer {
    #[must_use]
    pub fn builder(repository: Arc<dyn Repository>) -> CimServerBuilder {
        CimServerBuilder {
            repository,
            config: DispatcherConfig::default(),
            routing: None,
            providers: HashMap::new(),
        }
    }

    /// Execute one operation against a namespace, returning the terminal
    /// response.
    pub fn execute(
        &self,
        namespace: impl Into<Namespace>,
        request: OperationRequest,
    ) -> OperationResponse {
        let context = OperationContext::new(
            self.message_ids.fetch_add(1, Ordering::Relaxed),
            namespace,
        );
        self.dispatcher.dispatch(&context, &request)
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

/// Start-up assembly for [`CimServer`].
pub struct CimServerBuilder {
    repository: Arc<dyn Repository>,
    config: DispatcherConfig,
    routing: Option<RoutingTable>,
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl CimServerBuilder {
    #[must_use]
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Install the startup-built routing table.
    #[must_use]
    pub fn routing(mut self, routing: RoutingTable) -> Self {
        self.routing = Some(routing);
        self
    }

    /// Attach a provider under its routing worker key.
    #[must_use]
    pub fn provider(mut self, target: &ProviderTarget, provider: Arc<dyn Provider>) -> Self {
        self.providers.insert(target.worker_key(), provider);
        self
    }

    #[must_use]
    pub fn build(self) -> CimServer {
        let routing = self.routing.unwrap_or_else(|| {
            RoutingTable::builder()
                .repository_as_default_provider(true)
                .build()
        });
        CimServer {
            dispatcher: Dispatcher::new(self.config, routing, self.repository, self.providers),
            message_ids: AtomicU64::new(1),
        }
    }
}
