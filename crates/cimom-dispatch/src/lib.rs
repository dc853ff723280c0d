//! Operation dispatch: typed messages, fan-out/fan-in aggregation and
//! provider routing.
//!
//! | module       | contents                                                |
//! |--------------|---------------------------------------------------------|
//! | `message`    | request/response sum types, the serde hop envelope      |
//! | `aggregate`  | per-request response resequencing and merging           |
//! | `routing`    | provider registrations and the startup routing table    |
//! | `provider`   | the `Provider`/`Repository` collaborator traits         |
//! | `dispatcher` | resolution, worker channels, fan-out and delivery       |
//!
//! The dispatcher never blocks on a provider inside the resolution path:
//! requests go out over per-provider mpsc channels, responses come back
//! through the request's [`OperationAggregate`], and the terminal delivery
//! decision is serialized under the aggregate's mutex.

pub mod aggregate;
pub mod dispatcher;
pub mod message;
pub mod provider;
pub mod routing;

pub use aggregate::OperationAggregate;
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use message::{
    OperationContext, OperationRequest, OperationResponse, OperationResult, RequestEnvelope,
    ResponsePayload,
};
pub use provider::{Provider, Repository};
pub use routing::{ProviderRegistration, ProviderRegistry, ProviderTarget, RoutingTable};
