//! Error taxonomy for the cimom object manager.
//!
//! Two tiers, mirroring how errors actually flow through the server:
//!
//! - Hot per-property encoding paths return dedicated result-code enums
//!   defined next to the encoding engine (never this type).
//! - Boundary-facing operations (dispatcher handlers, repository calls) use
//!   [`CimError`], which carries a DMTF status code and is converted 1:1 into
//!   the status of the response delivered to the client.

use thiserror::Error;

/// Convenience alias used by every boundary-facing operation.
pub type Result<T> = std::result::Result<T, CimError>;

/// DMTF CIM status codes (DSP0200 §5.2).
///
/// The numeric values are part of the client protocol and must not change.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(u16)]
pub enum CimStatusCode {
    /// A general error occurred that is not covered by a more specific code.
    Failed = 1,
    /// Access to a CIM resource was not available to the client.
    AccessDenied = 2,
    /// The target namespace does not exist.
    InvalidNamespace = 3,
    /// One or more parameter values passed to the method were invalid.
    InvalidParameter = 4,
    /// The specified class does not exist.
    InvalidClass = 5,
    /// The requested object could not be found.
    NotFound = 6,
    /// The requested operation is not supported.
    NotSupported = 7,
    /// The operation cannot be carried out on this class since it has subclasses.
    ClassHasChildren = 8,
    /// The operation cannot be carried out on this class since it has instances.
    ClassHasInstances = 9,
    /// The operation cannot be carried out: the superclass does not exist.
    InvalidSuperclass = 10,
    /// The operation cannot be carried out: the object already exists.
    AlreadyExists = 11,
    /// The specified property does not exist.
    NoSuchProperty = 12,
    /// The value supplied is incompatible with the type.
    TypeMismatch = 13,
    /// The query language is not recognized or supported.
    QueryLanguageNotSupported = 14,
    /// The query is not valid for the specified query language.
    InvalidQuery = 15,
    /// The extrinsic method could not be executed.
    MethodNotAvailable = 16,
    /// The specified extrinsic method does not exist.
    MethodNotFound = 17,
}

impl CimStatusCode {
    /// The numeric DMTF code carried on the wire.
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// The canonical status-code name, e.g. `CIM_ERR_NOT_FOUND`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Failed => "CIM_ERR_FAILED",
            Self::AccessDenied => "CIM_ERR_ACCESS_DENIED",
            Self::InvalidNamespace => "CIM_ERR_INVALID_NAMESPACE",
            Self::InvalidParameter => "CIM_ERR_INVALID_PARAMETER",
            Self::InvalidClass => "CIM_ERR_INVALID_CLASS",
            Self::NotFound => "CIM_ERR_NOT_FOUND",
            Self::NotSupported => "CIM_ERR_NOT_SUPPORTED",
            Self::ClassHasChildren => "CIM_ERR_CLASS_HAS_CHILDREN",
            Self::ClassHasInstances => "CIM_ERR_CLASS_HAS_INSTANCES",
            Self::InvalidSuperclass => "CIM_ERR_INVALID_SUPERCLASS",
            Self::AlreadyExists => "CIM_ERR_ALREADY_EXISTS",
            Self::NoSuchProperty => "CIM_ERR_NO_SUCH_PROPERTY",
            Self::TypeMismatch => "CIM_ERR_TYPE_MISMATCH",
            Self::QueryLanguageNotSupported => "CIM_ERR_QUERY_LANGUAGE_NOT_SUPPORTED",
            Self::InvalidQuery => "CIM_ERR_INVALID_QUERY",
            Self::MethodNotAvailable => "CIM_ERR_METHOD_NOT_AVAILABLE",
            Self::MethodNotFound => "CIM_ERR_METHOD_NOT_FOUND",
        }
    }

    /// Map a status code to the administrative CLI exit code.
    ///
    /// The CLI collaborator maps common failures to small stable integers so
    /// scripts can branch on them: success is 0, generic failure 1, and the
    /// codes below get 2 through 7.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::NotFound => 2,
            Self::InvalidNamespace => 3,
            Self::NotSupported => 4,
            Self::AccessDenied => 5,
            Self::InvalidClass => 6,
            Self::InvalidParameter => 7,
            _ => 1,
        }
    }
}

impl std::fmt::Display for CimStatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Primary error type for cimom operations.
///
/// Structured variants for the common schema/operation failures; every
/// variant maps to exactly one [`CimStatusCode`] via [`CimError::status_code`].
#[derive(Error, Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CimError {
    /// The target namespace does not exist.
    #[error("invalid namespace: '{namespace}'")]
    InvalidNamespace { namespace: String },

    /// The specified class does not exist in the namespace.
    #[error("invalid class: '{class_name}' in namespace '{namespace}'")]
    InvalidClass {
        namespace: String,
        class_name: String,
    },

    /// The requested object (instance, class, qualifier) was not found.
    #[error("not found: {detail}")]
    NotFound { detail: String },

    /// The requested operation is not supported by any provider or the repository.
    #[error("operation not supported: {detail}")]
    NotSupported { detail: String },

    /// An operation parameter failed validation.
    #[error("invalid parameter: {detail}")]
    InvalidParameter { detail: String },

    /// The client is not authorized for the operation.
    #[error("access denied: {detail}")]
    AccessDenied { detail: String },

    /// The object to create already exists.
    #[error("already exists: {detail}")]
    AlreadyExists { detail: String },

    /// The named property does not exist on the class.
    #[error("no such property: {property}")]
    NoSuchProperty { property: String },

    /// A supplied value's type is incompatible with the declared type.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// The named extrinsic method does not exist on the class.
    #[error("method not found: {method}")]
    MethodNotFound { method: String },

    /// Catch-all failure carrying a free-form message.
    #[error("operation failed: {detail}")]
    Failed { detail: String },
}

impl CimError {
    /// The DMTF status code that represents this error on the wire.
    #[must_use]
    pub const fn status_code(&self) -> CimStatusCode {
        match self {
            Self::InvalidNamespace { .. } => CimStatusCode::InvalidNamespace,
            Self::InvalidClass { .. } => CimStatusCode::InvalidClass,
            Self::NotFound { .. } => CimStatusCode::NotFound,
            Self::NotSupported { .. } => CimStatusCode::NotSupported,
            Self::InvalidParameter { .. } => CimStatusCode::InvalidParameter,
            Self::AccessDenied { .. } => CimStatusCode::AccessDenied,
            Self::AlreadyExists { .. } => CimStatusCode::AlreadyExists,
            Self::NoSuchProperty { .. } => CimStatusCode::NoSuchProperty,
            Self::TypeMismatch { .. } => CimStatusCode::TypeMismatch,
            Self::MethodNotFound { .. } => CimStatusCode::MethodNotFound,
            Self::Failed { .. } => CimStatusCode::Failed,
        }
    }

    /// Shorthand for a `Failed` error from anything displayable.
    pub fn failed(detail: impl Into<String>) -> Self {
        Self::Failed {
            detail: detail.into(),
        }
    }

    /// Shorthand for a `NotSupported` error.
    pub fn not_supported(detail: impl Into<String>) -> Self {
        Self::NotSupported {
            detail: detail.into(),
        }
    }
}
