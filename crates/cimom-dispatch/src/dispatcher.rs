//! The operation dispatcher: provider resolution, fan-out and fan-in.
//!
//! For every public CIM operation the dispatcher determines the owning
//! provider(s) through the routing table, clones the request per destination,
//! and forwards asynchronously over per-provider worker channels. Responses
//! come back to the request's `OperationAggregate`; the completion decision
//! and the final client delivery are serialized under the aggregate's mutex,
//! so the client always receives exactly one terminal response.
//!
//! Schema operations (classes, qualifiers) are answered from the repository
//! synchronously; only instance/association/method operations fan out.

use std::collections::HashMap;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use cimom_error::{CimError, CimStatusCode};
use cimom_types::{CimName, CimQualifier};
use tracing::{debug, warn};

use crate::aggregate::OperationAggregate;
use crate::message::{
    OperationContext, OperationRequest, OperationResponse, OperationResult, RequestEnvelope,
    ResponsePayload,
};
use crate::provider::{Provider, Repository};
use crate::routing::{ProviderTarget, RoutingTable};

/// Dispatcher tunables, fixed at start-up.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Host name stamped onto returned object paths that lack one.
    pub local_host: String,
    /// Fan-out ceiling: an enumeration needing more distinct providers than
    /// this fails fast with not-supported instead of fanning out unboundedly.
    pub max_enumerate_breadth: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            local_host: "localhost".to_owned(),
            max_enumerate_breadth: 30,
        }
    }
}

/// One queued unit of provider work.
struct WorkItem {
    /// The serialized request envelope; the worker side deserializes it, so
    /// the internal hop format is exercised on every forward.
    envelope_json: String,
    aggregate: Arc<OperationAggregate>,
    reply: Sender<OperationResponse>,
}

struct Worker {
    /// Return-queue id this worker's hop pushes onto the context stack.
    queue_id: u64,
    tx: Sender<WorkItem>,
    handle: Option<JoinHandle<()>>,
}

/// The dispatcher. Owns one worker thread per provider plus one for the
/// repository, all spawned at construction.
pub struct Dispatcher {
    config: DispatcherConfig,
    routing: RoutingTable,
    repository: Arc<dyn Repository>,
    workers: HashMap<String, Worker>,
}

impl Dispatcher {
    /// Build the dispatcher and spawn its workers.
    ///
    /// `providers` is keyed by [`ProviderTarget::worker_key`]; the repository
    /// worker is added implicitly under its own key.
    #[must_use]
    pub fn new(
        config: DispatcherConfig,
        routing: RoutingTable,
        repository: Arc<dyn Repository>,
        providers: HashMap<String, Arc<dyn Provider>>,
    ) -> Self {
        let mut workers = HashMap::new();
        let mut queue_ids = 1u64..;
        for (key, provider) in providers {
            let queue_id = queue_ids.next().unwrap_or(u64::MAX);
            workers.insert(key.clone(), spawn_worker(key, queue_id, provider));
        }
        let repo_key = ProviderTarget::Repository.worker_key();
        let repo_queue_id = queue_ids.next().unwrap_or(u64::MAX);
        workers.insert(
            repo_key.clone(),
            spawn_worker(
                repo_key,
                repo_queue_id,
                Arc::new(RepositoryProvider(Arc::clone(&repository))),
            ),
        );
        Self {
            config,
            routing,
            repository,
            workers,
        }
    }

    #[must_use]
    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    /// Handle one client request end to end.
    ///
    /// Synchronous validation failures become a status response here; nothing
    /// escapes as a panic or a missing reply. Always exactly one terminal
    /// response.
    pub fn dispatch(
        &self,
        context: &OperationContext,
        request: &OperationRequest,
    ) -> OperationResponse {
        debug!(
            message_id = context.message_id,
            op = request.op_name(),
            namespace = context.namespace.as_str(),
            "dispatching"
        );
        match self.try_dispatch(context, request) {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    message_id = context.message_id,
                    op = request.op_name(),
                    %err,
                    "request failed"
                );
                OperationResponse::error(context, err.status_code(), err.to_string())
            }
        }
    }

    fn try_dispatch(
        &self,
        context: &OperationContext,
        request: &OperationRequest,
    ) -> Result<OperationResponse, CimError> {
        if !self.repository.namespace_exists(&context.namespace) {
            return Err(CimError::InvalidNamespace {
                namespace: context.namespace.as_str().to_owned(),
            });
        }
        self.validate_target_class(context, request)?;

        match request {
            OperationRequest::GetClass {
                class_name,
                include_qualifiers,
            } => self.get_class(context, class_name, *include_qualifiers),
            OperationRequest::EnumerateClasses {
                class_name,
                deep_inheritance,
            } => {
                let classes = self.repository.enumerate_classes(
                    &context.namespace,
                    class_name.as_ref(),
                    *deep_inheritance,
                );
                Ok(OperationResponse::ok(
                    context,
                    ResponsePayload::Classes { classes },
                ))
            }
            OperationRequest::GetQualifier { name } => self.get_qualifier(context, name),
            OperationRequest::EnumerateQualifiers => {
                let qualifiers = self.repository.enumerate_qualifiers(&context.namespace);
                Ok(OperationResponse::ok(
                    context,
                    ResponsePayload::Qualifiers { qualifiers },
                ))
            }
            OperationRequest::EnumerateInstances { class_name, .. }
            | OperationRequest::EnumerateInstanceNames { class_name } => {
                self.fan_out_enumeration(context, request, class_name)
            }
            OperationRequest::Associators {
                path, assoc_class, ..
            }
            | OperationRequest::AssociatorNames {
                path, assoc_class, ..
            } => self.fan_out_association(context, request, &path.class_name, assoc_class.as_ref()),
            OperationRequest::References {
                path, result_class, ..
            }
            | OperationRequest::ReferenceNames {
                path, result_class, ..
            } => self.fan_out_association(context, request, &path.class_name, result_class.as_ref()),
            other => self.forward_single(context, other),
        }
    }

    /// Instance operations must name a class the repository knows.
    fn validate_target_class(
        &self,
        context: &OperationContext,
        request: &OperationRequest,
    ) -> Result<(), CimError> {
        if matches!(
            request,
            OperationRequest::GetQualifier { .. }
                | OperationRequest::EnumerateQualifiers
                | OperationRequest::EnumerateClasses { .. }
        ) {
            return Ok(());
        }
        if let Some(class_name) = request.target_class() {
            if self
                .repository
                .get_class(&context.namespace, class_name)
                .is_none()
            {
                return Err(CimError::InvalidClass {
                    namespace: context.namespace.as_str().to_owned(),
                    class_name: class_name.as_str().to_owned(),
                });
            }
        }
        Ok(())
    }

    fn get_class(
        &self,
        context: &OperationContext,
        class_name: &CimName,
        include_qualifiers: bool,
    ) -> Result<OperationResponse, CimError> {
        let mut class = self
            .repository
            .get_class(&context.namespace, class_name)
            .ok_or_else(|| CimError::InvalidClass {
                namespace: context.namespace.as_str().to_owned(),
                class_name: class_name.as_str().to_owned(),
            })?;
        if !include_qualifiers {
            class.qualifiers.clear();
            for p in &mut class.properties {
                p.qualifiers.clear();
            }
        }
        Ok(OperationResponse::ok(
            context,
            ResponsePayload::Class { class },
        ))
    }

    fn get_qualifier(
        &self,
        context: &OperationContext,
        name: &CimName,
    ) -> Result<OperationResponse, CimError> {
        let qualifier: CimQualifier = self
            .repository
            .get_qualifier(&context.namespace, name)
            .ok_or_else(|| CimError::NotFound {
                detail: format!("qualifier '{name}'"),
            })?;
        Ok(OperationResponse::ok(
            context,
            ResponsePayload::Qualifier { qualifier },
        ))
    }

    /// Single-destination forward for non-enumeration operations.
    fn forward_single(
        &self,
        context: &OperationContext,
        request: &OperationRequest,
    ) -> Result<OperationResponse, CimError> {
        let class_name = request
            .target_class()
            .ok_or_else(|| CimError::not_supported(request.op_name()))?;
        let target = self
            .routing
            .resolve(&context.namespace, class_name)
            .ok_or_else(|| {
                CimError::not_supported(format!(
                    "no provider for class '{class_name}' in namespace '{}'",
                    context.namespace
                ))
            })?;

        let aggregate = Arc::new(OperationAggregate::new(
            context.clone(),
            request.clone(),
            self.config.local_host.clone(),
            1,
        ));
        let (reply_tx, reply_rx) = std::sync::mpsc::channel();
        self.forward(&aggregate, &target, context, request, &reply_tx)?;
        drop(reply_tx);
        self.await_terminal(reply_rx)
    }

    /// Association fan-out: one forward per association class touching the
    /// source class, plus one bundled repository call for association classes
    /// without a registered provider.
    fn fan_out_association(
        &self,
        context: &OperationContext,
        request: &OperationRequest,
        class_name: &CimName,
        class_filter: Option<&CimName>,
    ) -> Result<OperationResponse, CimError> {
        let mut assoc_classes = self
            .repository
            .association_class_names(&context.namespace, class_name);
        if let Some(filter) = class_filter {
            assoc_classes.retain(|c| c == filter);
        }

        let mut forwards: Vec<(CimName, ProviderTarget)> = Vec::new();
        let mut repository_covers = false;
        for class in &assoc_classes {
            match self.routing.resolve(&context.namespace, class) {
                Some(ProviderTarget::Repository) | None => {
                    repository_covers = repository_covers || self.routing.repository_is_default();
                }
                Some(target) => forwards.push((class.clone(), target)),
            }
        }
        // No association classes at all: the repository still answers (with
        // an empty result or a decline) when it is the default provider.
        if assoc_classes.is_empty() {
            repository_covers = self.routing.repository_is_default();
        }

        let breadth = forwards.len() + usize::from(repository_covers);
        if breadth > self.config.max_enumerate_breadth {
            return Err(CimError::not_supported(format!(
                "association traversal of '{class_name}' needs {breadth} providers, limit is {}",
                self.config.max_enumerate_breadth
            )));
        }
        if breadth == 0 {
            return Err(CimError::not_supported(format!(
                "no association provider for class '{class_name}' in namespace '{}'",
                context.namespace
            )));
        }

        let aggregate = Arc::new(OperationAggregate::new(
            context.clone(),
            request.clone(),
            self.config.local_host.clone(),
            breadth as u64,
        ));
        let (reply_tx, reply_rx) = std::sync::mpsc::channel();
        for (class, target) in &forwards {
            let narrowed = narrow_to_assoc_class(request, class);
            self.forward(&aggregate, target, context, &narrowed, &reply_tx)?;
        }
        if repository_covers {
            self.forward(
                &aggregate,
                &ProviderTarget::Repository,
                context,
                request,
                &reply_tx,
            )?;
        }
        drop(reply_tx);
        self.await_terminal(reply_rx)
    }

    /// Enumeration fan-out over the subclass closure, one provider per
    /// subclass, plus one bundled repository call for subclasses without a
    /// registered provider.
    fn fan_out_enumeration(
        &self,
        context: &OperationContext,
        request: &OperationRequest,
        class_name: &CimName,
    ) -> Result<OperationResponse, CimError> {
        let mut classes = vec![class_name.clone()];
        classes.extend(
            self.repository
                .subclass_names(&context.namespace, class_name, true),
        );

        let mut forwards: Vec<(CimName, ProviderTarget)> = Vec::new();
        let mut repository_covers = false;
        for class in &classes {
            match self.routing.resolve(&context.namespace, class) {
                Some(ProviderTarget::Repository) | None => {
                    // One bundled repository call covers every such subclass.
                    repository_covers = repository_covers || self.routing.repository_is_default();
                }
                Some(target) => forwards.push((class.clone(), target)),
            }
        }

        let breadth = forwards.len() + usize::from(repository_covers);
        if breadth > self.config.max_enumerate_breadth {
            return Err(CimError::not_supported(format!(
                "enumeration of '{class_name}' needs {breadth} providers, limit is {}",
                self.config.max_enumerate_breadth
            )));
        }
        if breadth == 0 {
            return Err(CimError::not_supported(format!(
                "no provider for class '{class_name}' in namespace '{}'",
                context.namespace
            )));
        }

        let aggregate = Arc::new(OperationAggregate::new(
            context.clone(),
            request.clone(),
            self.config.local_host.clone(),
            breadth as u64,
        ));
        let (reply_tx, reply_rx) = std::sync::mpsc::channel();
        for (class, target) in &forwards {
            let narrowed = narrow_to_class(request, class);
            self.forward(&aggregate, target, context, &narrowed, &reply_tx)?;
        }
        if repository_covers {
            self.forward(
                &aggregate,
                &ProviderTarget::Repository,
                context,
                request,
                &reply_tx,
            )?;
        }
        drop(reply_tx);
        self.await_terminal(reply_rx)
    }

    fn forward(
        &self,
        aggregate: &Arc<OperationAggregate>,
        target: &ProviderTarget,
        context: &OperationContext,
        request: &OperationRequest,
        reply: &Sender<OperationResponse>,
    ) -> Result<(), CimError> {
        let key = target.worker_key();
        let worker = self
            .workers
            .get(&key)
            .ok_or_else(|| CimError::failed(format!("no worker for provider '{key}'")))?;
        // This hop pushes its return-queue id; the worker pops it on reply.
        let mut hop_context = context.clone();
        hop_context.queue_ids.push(worker.queue_id);
        let envelope = RequestEnvelope {
            context: hop_context,
            request: request.clone(),
        };
        let envelope_json = serde_json::to_string(&envelope)
            .map_err(|e| CimError::failed(format!("request envelope serialization: {e}")))?;
        worker
            .tx
            .send(WorkItem {
                envelope_json,
                aggregate: Arc::clone(aggregate),
                reply: reply.clone(),
            })
            .map_err(|_| CimError::failed(format!("provider worker '{key}' is gone")))
    }

    fn await_terminal(
        &self,
        reply_rx: Receiver<OperationResponse>,
    ) -> Result<OperationResponse, CimError> {
        reply_rx
            .recv()
            .map_err(|_| CimError::failed("providers disconnected before responding"))
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Closing the channels ends the worker loops; then join.
        for worker in self.workers.values_mut() {
            drop(std::mem::replace(&mut worker.tx, dead_sender()));
        }
        for (key, worker) in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    warn!(worker = key.as_str(), "provider worker panicked");
                }
            }
        }
    }
}

/// A sender whose receiver is already gone, used to close worker channels.
fn dead_sender() -> Sender<WorkItem> {
    let (tx, _) = std::sync::mpsc::channel();
    tx
}

fn spawn_worker(key: String, queue_id: u64, provider: Arc<dyn Provider>) -> Worker {
    let (tx, rx) = std::sync::mpsc::channel::<WorkItem>();
    let thread_key = key.clone();
    let handle = std::thread::spawn(move || worker_loop(&thread_key, &*provider, &rx));
    Worker {
        queue_id,
        tx,
        handle: Some(handle),
    }
}

fn worker_loop(key: &str, provider: &dyn Provider, rx: &Receiver<WorkItem>) {
    while let Ok(item) = rx.recv() {
        let response = match serde_json::from_str::<RequestEnvelope>(&item.envelope_json) {
            Ok(envelope) => {
                // A panicking provider must not take the worker (and the
                // pending aggregate) down with it; the panic becomes a
                // failed response like any other provider error.
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    provider.handle(&envelope.context, &envelope.request)
                }))
                .unwrap_or_else(|_| {
                    warn!(worker = key, op = envelope.request.op_name(), "provider panicked");
                    OperationResult::error(
                        CimStatusCode::Failed,
                        format!("provider '{key}' panicked"),
                    )
                });
                let mut response = match result {
                    OperationResult::Ok { payload } => {
                        OperationResponse::ok(&envelope.context, payload)
                    }
                    OperationResult::Error { code, description } => {
                        OperationResponse::error(&envelope.context, code, description)
                    }
                };
                // Pop this hop's return-queue entry.
                response.queue_ids.pop();
                response
            }
            Err(err) => {
                warn!(worker = key, %err, "undecodable request envelope");
                OperationResponse::error(
                    item.aggregate.context(),
                    CimStatusCode::Failed,
                    format!("undecodable request envelope: {err}"),
                )
            }
        };
        // The append readiness transition fires exactly once per aggregate
        // cycle, so exactly one worker performs the merge and the delivery.
        if item.aggregate.append_response(response) {
            if let Some(merged) = item.aggregate.merge_responses() {
                if item.reply.send(merged).is_err() {
                    debug!(worker = key, "client reply channel closed, dropping response");
                }
            }
        }
    }
}

/// Adapter letting the repository stand in as the default instance provider
/// behind its own worker.
struct RepositoryProvider(Arc<dyn Repository>);

impl Provider for RepositoryProvider {
    fn handle(&self, context: &OperationContext, request: &OperationRequest) -> OperationResult {
        self.0.handle(context, request)
    }
}

/// Clone an enumeration request re-targeted at one subclass.
fn narrow_to_class(request: &OperationRequest, class: &CimName) -> OperationRequest {
    match request {
        OperationRequest::EnumerateInstances {
            deep_inheritance,
            property_list,
            ..
        } => OperationRequest::EnumerateInstances {
            class_name: class.clone(),
            deep_inheritance: *deep_inheritance,
            property_list: property_list.clone(),
        },
        OperationRequest::EnumerateInstanceNames { .. } => {
            OperationRequest::EnumerateInstanceNames {
                class_name: class.clone(),
            }
        }
        other => other.clone(),
    }
}

/// Clone an association request narrowed to one association class.
fn narrow_to_assoc_class(request: &OperationRequest, class: &CimName) -> OperationRequest {
    let mut narrowed = request.clone();
    match &mut narrowed {
        OperationRequest::Associators { assoc_class, .. }
        | OperationRequest::AssociatorNames { assoc_class, .. } => {
            *assoc_class = Some(class.clone());
        }
        OperationRequest::References { result_class, .. }
        | OperationRequest::ReferenceNames { result_class, .. } => {
            *result_class = Some(class.clone());
        }
        _ => {}
    }
    narrowed
}

#[cfg(test)]
mod tests {
    use cimom_types::{
        CimClass, CimInstance, CimObjectPath, CimProperty, CimType, KeyBindingValue, Namespace,
    };

    use crate::routing::ProviderRegistration;

    use super::*;

    /// Toy repository: a flat class hierarchy in one namespace, plus canned
    /// instances served when acting as the default provider.
    struct TestRepository {
        namespace: Namespace,
        classes: Vec<CimClass>,
        instances: Vec<CimInstance>,
    }

    impl TestRepository {
        fn subclasses_of(&self, name: &CimName) -> Vec<CimName> {
            self.classes
                .iter()
                .filter(|c| &c.super_class == name)
                .map(|c| c.class_name.clone())
                .collect()
        }
    }

    impl Repository for TestRepository {
        fn namespace_exists(&self, namespace: &Namespace) -> bool {
            *namespace == self.namespace
        }

        fn get_class(&self, namespace: &Namespace, class_name: &CimName) -> Option<CimClass> {
            (*namespace == self.namespace)
                .then(|| self.classes.iter().find(|c| &c.class_name == class_name))
                .flatten()
                .cloned()
        }

        fn subclass_names(
            &self,
            _namespace: &Namespace,
            class_name: &CimName,
            deep: bool,
        ) -> Vec<CimName> {
            let mut out = self.subclasses_of(class_name);
            if deep {
                let mut frontier = out.clone();
                while let Some(next) = frontier.pop() {
                    let children = self.subclasses_of(&next);
                    frontier.extend(children.clone());
                    out.extend(children);
                }
            }
            out
        }

        fn enumerate_classes(
            &self,
            _namespace: &Namespace,
            _superclass: Option<&CimName>,
            _deep: bool,
        ) -> Vec<CimClass> {
            self.classes.clone()
        }

        fn association_class_names(
            &self,
            _namespace: &Namespace,
            class_name: &CimName,
        ) -> Vec<CimName> {
            self.classes
                .iter()
                .filter(|c| {
                    c.properties.iter().any(|p| {
                        p.cim_type == CimType::Reference && p.reference_class == *class_name
                    })
                })
                .map(|c| c.class_name.clone())
                .collect()
        }

        fn get_qualifier(&self, _namespace: &Namespace, _name: &CimName) -> Option<CimQualifier> {
            None
        }

        fn enumerate_qualifiers(&self, _namespace: &Namespace) -> Vec<CimQualifier> {
            Vec::new()
        }

        fn handle(
            &self,
            _context: &OperationContext,
            request: &OperationRequest,
        ) -> OperationResult {
            match request {
                OperationRequest::EnumerateInstances { .. } => OperationResult::Ok {
                    payload: ResponsePayload::Instances {
                        instances: self.instances.clone(),
                    },
                },
                OperationRequest::EnumerateInstanceNames { .. } => OperationResult::Ok {
                    payload: ResponsePayload::Paths {
                        paths: self.instances.iter().filter_map(|i| i.path.clone()).collect(),
                    },
                },
                _ => OperationResult::error(CimStatusCode::NotSupported, "repository"),
            }
        }
    }

    /// Provider answering enumerations with one named path.
    struct OnePathProvider {
        id: &'static str,
    }

    impl Provider for OnePathProvider {
        fn handle(
            &self,
            _context: &OperationContext,
            request: &OperationRequest,
        ) -> OperationResult {
            match request {
                OperationRequest::EnumerateInstanceNames { class_name } => {
                    let mut path = CimObjectPath::with_class(class_name.as_str());
                    path.push_key("Id", KeyBindingValue::String(self.id.into()));
                    OperationResult::Ok {
                        payload: ResponsePayload::Paths { paths: vec![path] },
                    }
                }
                OperationRequest::GetInstance { path, .. } => OperationResult::Ok {
                    payload: ResponsePayload::Instance {
                        instance: {
                            let mut inst = CimInstance::new(path.class_name.as_str());
                            inst.path = Some(path.clone());
                            inst
                        },
                    },
                },
                OperationRequest::AssociatorNames { .. }
                | OperationRequest::ReferenceNames { .. } => {
                    let mut path = CimObjectPath::with_class("Acme_Host");
                    path.push_key("Id", KeyBindingValue::String(self.id.into()));
                    OperationResult::Ok {
                        payload: ResponsePayload::Paths { paths: vec![path] },
                    }
                }
                _ => OperationResult::error(CimStatusCode::NotSupported, "one-path provider"),
            }
        }
    }

    fn class(name: &str, super_class: &str) -> CimClass {
        let mut c = CimClass::new(name, "root/acme")
            .with_property(CimProperty::declared("Id", CimType::String, false).key());
        c.super_class = CimName::new(super_class);
        c
    }

    fn assoc_class(name: &str, to: &str) -> CimClass {
        let mut reference = CimProperty::declared("Antecedent", CimType::Reference, false).key();
        reference.reference_class = CimName::new(to);
        CimClass::new(name, "root/acme").with_property(reference)
    }

    fn build_dispatcher_with(
        registered: Vec<(&'static str, Arc<dyn Provider>)>,
        repository_default: bool,
        max_breadth: usize,
    ) -> Dispatcher {
        let repo = Arc::new(TestRepository {
            namespace: "root/acme".into(),
            classes: vec![
                class("Acme_Disk", ""),
                class("Acme_SsdDisk", "Acme_Disk"),
                class("Acme_NvmeDisk", "Acme_SsdDisk"),
                assoc_class("Acme_DiskToHost", "Acme_Disk"),
                assoc_class("Acme_DiskToPool", "Acme_Disk"),
            ],
            instances: vec![{
                let mut inst = CimInstance::new("Acme_Disk");
                let mut p = CimObjectPath::with_class("Acme_Disk");
                p.push_key("Id", KeyBindingValue::String("repo0".into()));
                inst.path = Some(p);
                inst
            }],
        });

        let mut registry = crate::routing::ProviderRegistry::new();
        let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
        for (name, provider) in registered {
            let registration = ProviderRegistration {
                namespace: "root/acme".into(),
                class_name: name.into(),
                module_name: "TestModule".into(),
                provider_name: format!("{name}Provider"),
                service_id: 1,
            };
            providers.insert(
                ProviderTarget::Registered(registration.clone()).worker_key(),
                provider,
            );
            registry.register(registration);
        }
        let routing = RoutingTable::builder()
            .registry(registry)
            .repository_as_default_provider(repository_default)
            .build();
        Dispatcher::new(
            DispatcherConfig {
                local_host: "host.example.org".into(),
                max_enumerate_breadth: max_breadth,
            },
            routing,
            repo,
            providers,
        )
    }

    fn build_dispatcher(
        registered: &[&'static str],
        repository_default: bool,
        max_breadth: usize,
    ) -> Dispatcher {
        build_dispatcher_with(
            registered
                .iter()
                .map(|name| (*name, Arc::new(OnePathProvider { id: *name }) as Arc<dyn Provider>))
                .collect(),
            repository_default,
            max_breadth,
        )
    }

    fn enumerate_names(d: &Dispatcher, class: &str) -> OperationResponse {
        d.dispatch(
            &OperationContext::new(1, "root/acme"),
            &OperationRequest::EnumerateInstanceNames {
                class_name: CimName::new(class),
            },
        )
    }

    fn paths_of(response: &OperationResponse) -> Vec<String> {
        match &response.result {
            OperationResult::Ok {
                payload: ResponsePayload::Paths { paths },
            } => paths
                .iter()
                .map(|p| match &p.key_binding("Id").unwrap().value {
                    KeyBindingValue::String(s) => s.clone(),
                    other => panic!("unexpected: {other:?}"),
                })
                .collect(),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn fan_out_merges_provider_and_repository_results() {
        let d = build_dispatcher(&["Acme_SsdDisk", "Acme_NvmeDisk"], true, 30);
        let response = enumerate_names(&d, "Acme_Disk");
        assert!(response.complete);

        let mut ids = paths_of(&response);
        ids.sort();
        assert_eq!(ids, vec!["Acme_NvmeDisk", "Acme_SsdDisk", "repo0"]);
    }

    #[test]
    fn merged_paths_are_fully_qualified() {
        let d = build_dispatcher(&["Acme_Disk"], false, 30);
        let response = enumerate_names(&d, "Acme_Disk");
        match &response.result {
            OperationResult::Ok {
                payload: ResponsePayload::Paths { paths },
            } => {
                for p in paths {
                    assert_eq!(p.host, "host.example.org");
                    assert_eq!(p.namespace.as_str(), "root/acme");
                }
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn breadth_guard_fails_fast() {
        let d = build_dispatcher(&["Acme_Disk", "Acme_SsdDisk", "Acme_NvmeDisk"], false, 2);
        let response = enumerate_names(&d, "Acme_Disk");
        assert_eq!(
            response.result.error_code(),
            Some(CimStatusCode::NotSupported)
        );
    }

    #[test]
    fn unknown_namespace_is_a_synchronous_status_response() {
        let d = build_dispatcher(&["Acme_Disk"], false, 30);
        let response = d.dispatch(
            &OperationContext::new(2, "root/nope"),
            &OperationRequest::EnumerateInstanceNames {
                class_name: CimName::new("Acme_Disk"),
            },
        );
        assert_eq!(
            response.result.error_code(),
            Some(CimStatusCode::InvalidNamespace)
        );
        assert!(response.complete);
    }

    #[test]
    fn unknown_class_is_invalid_class() {
        let d = build_dispatcher(&["Acme_Disk"], false, 30);
        let response = enumerate_names(&d, "Acme_Tape");
        assert_eq!(
            response.result.error_code(),
            Some(CimStatusCode::InvalidClass)
        );
    }

    #[test]
    fn no_provider_anywhere_is_not_supported() {
        let d = build_dispatcher(&[], false, 30);
        let response = enumerate_names(&d, "Acme_Disk");
        assert_eq!(
            response.result.error_code(),
            Some(CimStatusCode::NotSupported)
        );
    }

    #[test]
    fn single_target_operations_route_to_the_registered_provider() {
        let d = build_dispatcher(&["Acme_Disk"], false, 30);
        let mut path = CimObjectPath::with_class("Acme_Disk").in_namespace("root/acme");
        path.push_key("Id", KeyBindingValue::String("d0".into()));
        let response = d.dispatch(
            &OperationContext::new(3, "root/acme"),
            &OperationRequest::GetInstance {
                path,
                property_list: None,
            },
        );
        assert!(response.complete);
        match &response.result {
            OperationResult::Ok {
                payload: ResponsePayload::Instance { instance },
            } => {
                assert_eq!(instance.class_name.as_str(), "Acme_Disk");
                let p = instance.path.as_ref().unwrap();
                assert_eq!(p.host, "host.example.org");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    fn associator_names(d: &Dispatcher, assoc_class: Option<&str>) -> OperationResponse {
        let mut path = CimObjectPath::with_class("Acme_Disk").in_namespace("root/acme");
        path.push_key("Id", KeyBindingValue::String("d0".into()));
        d.dispatch(
            &OperationContext::new(5, "root/acme"),
            &OperationRequest::AssociatorNames {
                path,
                assoc_class: assoc_class.map(CimName::new),
                result_class: None,
                role: None,
                result_role: None,
            },
        )
    }

    #[test]
    fn association_requests_fan_out_per_association_class() {
        let d = build_dispatcher(&["Acme_DiskToHost", "Acme_DiskToPool"], false, 30);
        let response = associator_names(&d, None);
        assert!(response.complete);
        let mut ids = paths_of(&response);
        ids.sort();
        assert_eq!(ids, vec!["Acme_DiskToHost", "Acme_DiskToPool"]);
    }

    #[test]
    fn assoc_class_filter_narrows_the_fan_out() {
        let d = build_dispatcher(&["Acme_DiskToHost", "Acme_DiskToPool"], false, 30);
        let response = associator_names(&d, Some("Acme_DiskToPool"));
        assert_eq!(paths_of(&response), vec!["Acme_DiskToPool"]);
    }

    #[test]
    fn provider_panic_becomes_a_failed_response() {
        struct PanickingProvider;

        impl Provider for PanickingProvider {
            fn handle(
                &self,
                _context: &OperationContext,
                _request: &OperationRequest,
            ) -> OperationResult {
                panic!("deliberate test panic")
            }
        }

        let d = build_dispatcher_with(vec![("Acme_Disk", Arc::new(PanickingProvider))], false, 30);
        // The worker must survive the panic, so a second call still answers.
        for attempt in 0..2 {
            let response = enumerate_names(&d, "Acme_Disk");
            assert!(response.complete, "attempt {attempt}");
            assert_eq!(
                response.result.error_code(),
                Some(CimStatusCode::Failed),
                "attempt {attempt}"
            );
        }
    }

    #[test]
    fn forwarded_hops_push_and_pop_the_return_queue() {
        struct DepthReportingProvider;

        impl Provider for DepthReportingProvider {
            fn handle(
                &self,
                context: &OperationContext,
                request: &OperationRequest,
            ) -> OperationResult {
                match request {
                    OperationRequest::EnumerateInstanceNames { class_name } => {
                        let mut path = CimObjectPath::with_class(class_name.as_str());
                        path.push_key(
                            "Id",
                            KeyBindingValue::String(context.queue_ids.len().to_string()),
                        );
                        OperationResult::Ok {
                            payload: ResponsePayload::Paths { paths: vec![path] },
                        }
                    }
                    _ => OperationResult::error(CimStatusCode::NotSupported, "depth reporter"),
                }
            }
        }

        let d = build_dispatcher_with(
            vec![("Acme_Disk", Arc::new(DepthReportingProvider))],
            false,
            30,
        );
        let response = enumerate_names(&d, "Acme_Disk");
        // The provider saw its hop's entry; the reply popped it back off.
        assert_eq!(paths_of(&response), vec!["1"]);
        assert!(response.queue_ids.is_empty());
    }

    #[test]
    fn class_operations_answer_from_the_repository() {
        let d = build_dispatcher(&[], false, 30);
        let response = d.dispatch(
            &OperationContext::new(4, "root/acme"),
            &OperationRequest::GetClass {
                class_name: CimName::new("Acme_SsdDisk"),
                include_qualifiers: true,
            },
        );
        match &response.result {
            OperationResult::Ok {
                payload: ResponsePayload::Class { class },
            } => {
                assert_eq!(class.class_name.as_str(), "Acme_SsdDisk");
                assert_eq!(class.super_class.as_str(), "Acme_Disk");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
