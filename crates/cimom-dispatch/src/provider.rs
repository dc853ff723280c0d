//! The collaborator traits the dispatcher forwards to.
//!
//! Providers and the repository run as independent schedulable units behind
//! worker channels; the dispatcher never calls them directly on the request
//! thread. A provider answers one operation with one result; chunked delivery
//! is the aggregate's concern, not the provider's.

use cimom_types::{CimClass, CimName, CimQualifier, Namespace};

use crate::message::{OperationContext, OperationRequest, OperationResult};

/// An operation handler for some set of (namespace, class) targets.
pub trait Provider: Send + Sync {
    /// Handle one operation.
    ///
    /// Unhandleable operations return a not-supported error result; the
    /// aggregate's suppression policy decides whether that surfaces.
    fn handle(&self, context: &OperationContext, request: &OperationRequest) -> OperationResult;
}

/// The schema/instance store behind the dispatcher.
///
/// Schema queries (classes, qualifiers, the subclass closure) are answered
/// synchronously on the dispatcher thread; instance operations go through
/// [`Repository::handle`] on the repository worker when the repository is
/// configured as the default instance provider.
pub trait Repository: Send + Sync {
    fn namespace_exists(&self, namespace: &Namespace) -> bool;

    fn get_class(&self, namespace: &Namespace, class_name: &CimName) -> Option<CimClass>;

    /// Subclasses of `class_name`, not including the class itself.
    /// `deep` walks the whole closure, otherwise direct children only.
    fn subclass_names(
        &self,
        namespace: &Namespace,
        class_name: &CimName,
        deep: bool,
    ) -> Vec<CimName>;

    /// Association classes that can link instances of `class_name`: classes
    /// with a reference-typed property whose declared target is the class or
    /// one of its ancestors. Drives the association fan-out.
    fn association_class_names(&self, namespace: &Namespace, class_name: &CimName)
        -> Vec<CimName>;

    fn enumerate_classes(
        &self,
        namespace: &Namespace,
        superclass: Option<&CimName>,
        deep: bool,
    ) -> Vec<CimClass>;

    fn get_qualifier(&self, namespace: &Namespace, name: &CimName) -> Option<CimQualifier>;

    fn enumerate_qualifiers(&self, namespace: &Namespace) -> Vec<CimQualifier>;

    /// Instance operations, for when the repository serves as the default
    /// instance provider.
    fn handle(&self, context: &OperationContext, request: &OperationRequest) -> OperationResult;
}
