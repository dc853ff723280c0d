//! Operation request/response messages and the internal envelope.
//!
//! Requests and responses are closed sum types so every handler match is
//! exhaustive; adding an operation is a compile-visible change, not a runtime
//! downcast. The serde envelope (`RequestEnvelope`/`OperationResponse` as
//! JSON) is the internal hop format between dispatcher and provider workers;
//! the only contract is that the writer and reader agree, so the shape may
//! change freely between versions.

use cimom_error::CimStatusCode;
use cimom_types::{
    CimClass, CimInstance, CimName, CimObjectPath, CimQualifier, CimValue, Namespace,
};
use serde::{Deserialize, Serialize};

/// Per-request context threaded through the dispatcher and every provider hop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationContext {
    /// Correlation id assigned by the accepting front end.
    pub message_id: u64,
    /// Target namespace of the operation.
    pub namespace: Namespace,
    /// Return-path stack: each forwarding hop pushes its queue id, each
    /// response hop pops one. The bottom entry addresses the client queue.
    pub queue_ids: Vec<u64>,
}

impl OperationContext {
    #[must_use]
    pub fn new(message_id: u64, namespace: impl Into<Namespace>) -> Self {
        Self {
            message_id,
            namespace: namespace.into(),
            queue_ids: Vec::new(),
        }
    }
}

/// A single CIM operation, fully typed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum OperationRequest {
    GetInstance {
        path: CimObjectPath,
        property_list: Option<Vec<String>>,
    },
    CreateInstance {
        instance: CimInstance,
    },
    ModifyInstance {
        instance: CimInstance,
        property_list: Option<Vec<String>>,
    },
    DeleteInstance {
        path: CimObjectPath,
    },
    EnumerateInstances {
        class_name: CimName,
        deep_inheritance: bool,
        property_list: Option<Vec<String>>,
    },
    EnumerateInstanceNames {
        class_name: CimName,
    },
    Associators {
        path: CimObjectPath,
        assoc_class: Option<CimName>,
        result_class: Option<CimName>,
        role: Option<String>,
        result_role: Option<String>,
    },
    AssociatorNames {
        path: CimObjectPath,
        assoc_class: Option<CimName>,
        result_class: Option<CimName>,
        role: Option<String>,
        result_role: Option<String>,
    },
    References {
        path: CimObjectPath,
        result_class: Option<CimName>,
        role: Option<String>,
    },
    ReferenceNames {
        path: CimObjectPath,
        result_class: Option<CimName>,
        role: Option<String>,
    },
    GetProperty {
        path: CimObjectPath,
        name: CimName,
    },
    SetProperty {
        path: CimObjectPath,
        name: CimName,
        value: Option<CimValue>,
    },
    InvokeMethod {
        path: CimObjectPath,
        method: CimName,
        in_params: Vec<(CimName, CimValue)>,
    },
    GetClass {
        class_name: CimName,
        include_qualifiers: bool,
    },
    EnumerateClasses {
        class_name: Option<CimName>,
        deep_inheritance: bool,
    },
    GetQualifier {
        name: CimName,
    },
    EnumerateQualifiers,
}

impl OperationRequest {
    /// Display name of the operation, for logs.
    #[must_use]
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::GetInstance { .. } => "GetInstance",
            Self::CreateInstance { .. } => "CreateInstance",
            Self::ModifyInstance { .. } => "ModifyInstance",
            Self::DeleteInstance { .. } => "DeleteInstance",
            Self::EnumerateInstances { .. } => "EnumerateInstances",
            Self::EnumerateInstanceNames { .. } => "EnumerateInstanceNames",
            Self::Associators { .. } => "Associators",
            Self::AssociatorNames { .. } => "AssociatorNames",
            Self::References { .. } => "References",
            Self::ReferenceNames { .. } => "ReferenceNames",
            Self::GetProperty { .. } => "GetProperty",
            Self::SetProperty { .. } => "SetProperty",
            Self::InvokeMethod { .. } => "InvokeMethod",
            Self::GetClass { .. } => "GetClass",
            Self::EnumerateClasses { .. } => "EnumerateClasses",
            Self::GetQualifier { .. } => "GetQualifier",
            Self::EnumerateQualifiers => "EnumerateQualifiers",
        }
    }

    /// The class this operation targets, when it names one.
    #[must_use]
    pub fn target_class(&self) -> Option<&CimName> {
        match self {
            Self::GetInstance { path, .. }
            | Self::DeleteInstance { path }
            | Self::Associators { path, .. }
            | Self::AssociatorNames { path, .. }
            | Self::References { path, .. }
            | Self::ReferenceNames { path, .. }
            | Self::GetProperty { path, .. }
            | Self::SetProperty { path, .. }
            | Self::InvokeMethod { path, .. } => Some(&path.class_name),
            Self::CreateInstance { instance } | Self::ModifyInstance { instance, .. } => {
                Some(&instance.class_name)
            }
            Self::EnumerateInstances { class_name, .. }
            | Self::EnumerateInstanceNames { class_name }
            | Self::GetClass { class_name, .. } => Some(class_name),
            Self::EnumerateClasses { class_name, .. } => class_name.as_ref(),
            Self::GetQualifier { .. } | Self::EnumerateQualifiers => None,
        }
    }
}

/// The request envelope as it travels between dispatcher and workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub context: OperationContext,
    pub request: OperationRequest,
}

/// Result payloads, one shape per operation family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ResponsePayload {
    /// Operations with no data result (delete, modify, set-property).
    Done,
    Instance {
        instance: CimInstance,
    },
    Instances {
        instances: Vec<CimInstance>,
    },
    Path {
        path: CimObjectPath,
    },
    Paths {
        paths: Vec<CimObjectPath>,
    },
    /// Associator results: full objects with paths.
    Objects {
        objects: Vec<CimInstance>,
    },
    Value {
        value: Option<CimValue>,
    },
    Class {
        class: CimClass,
    },
    Classes {
        classes: Vec<CimClass>,
    },
    Qualifier {
        qualifier: CimQualifier,
    },
    Qualifiers {
        qualifiers: Vec<CimQualifier>,
    },
    Method {
        return_value: Option<CimValue>,
        out_params: Vec<(CimName, CimValue)>,
    },
}

/// Success payload or error status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome")]
pub enum OperationResult {
    Ok { payload: ResponsePayload },
    Error { code: CimStatusCode, description: String },
}

impl OperationResult {
    #[must_use]
    pub fn error(code: CimStatusCode, description: impl Into<String>) -> Self {
        Self::Error {
            code,
            description: description.into(),
        }
    }

    /// The error status code, `None` for success payloads.
    #[must_use]
    pub fn error_code(&self) -> Option<CimStatusCode> {
        match self {
            Self::Ok { .. } => None,
            Self::Error { code, .. } => Some(*code),
        }
    }
}

/// One response chunk.
///
/// A single logical reply may arrive as several chunks; `index` orders them
/// and exactly one carries `complete = true`. Error responses are always
/// terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResponse {
    pub message_id: u64,
    /// Remaining return-path stack (the handling hop has popped its entry).
    pub queue_ids: Vec<u64>,
    /// Position of this chunk in the resequenced stream.
    pub index: u64,
    /// Whether this is the terminal chunk.
    pub complete: bool,
    pub result: OperationResult,
}

impl OperationResponse {
    /// A terminal success response.
    #[must_use]
    pub fn ok(context: &OperationContext, payload: ResponsePayload) -> Self {
        Self {
            message_id: context.message_id,
            queue_ids: context.queue_ids.clone(),
            index: 0,
            complete: true,
            result: OperationResult::Ok { payload },
        }
    }

    /// A terminal error response.
    #[must_use]
    pub fn error(
        context: &OperationContext,
        code: CimStatusCode,
        description: impl Into<String>,
    ) -> Self {
        Self {
            message_id: context.message_id,
            queue_ids: context.queue_ids.clone(),
            index: 0,
            complete: true,
            result: OperationResult::error(code, description),
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self.result, OperationResult::Error { .. })
    }

    #[must_use]
    pub fn is_not_supported(&self) -> bool {
        matches!(
            self.result,
            OperationResult::Error {
                code: CimStatusCode::NotSupported,
                ..
            }
        )
    }
}
