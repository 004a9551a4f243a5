//! Correlation ids linking an execution to the request that caused it
//!
//! The action log stores these in `context_json`; errors carry them so a
//! failed execution can be matched to its request without a log entry.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! correlation_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Fresh time-ordered id
            pub fn generate() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            /// Adopt an id minted upstream
            pub fn from_string(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

correlation_id!(
    /// Id of one inbound request, usually from an `x-request-id` header
    RequestId
);

correlation_id!(
    /// Distributed-trace id propagated by the caller
    TraceId
);

/// Where a command came from
///
/// The request body is never kept; only ids and the issuing surface reach the
/// audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub request_id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<TraceId>,
    /// `api`, `cli`, `job`, ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl RequestContext {
    pub fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            trace_id: None,
            source: None,
        }
    }

    /// Context for work that has no upstream request, e.g. a CLI invocation
    pub fn originating(source: impl Into<String>) -> Self {
        Self::new(RequestId::generate()).with_source(source)
    }

    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}
