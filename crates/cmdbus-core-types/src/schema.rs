//! Canonical schema constants for structured logging
//!
//! These constants keep field names identical across the bus, the store
//! and the test capture layer.

// Canonical field keys for structured logging
pub const FIELD_COMPONENT: &str = "component";
pub const FIELD_OP: &str = "op";
pub const FIELD_EVENT: &str = "event";
pub const FIELD_DURATION_MS: &str = "duration_ms";
pub const FIELD_REQUEST_ID: &str = "request_id";

// Command lifecycle identifiers
pub const FIELD_COMMAND_ID: &str = "command_id";
pub const FIELD_LOG_ID: &str = "log_id";
pub const FIELD_RESOURCE_KIND: &str = "resource_kind";
pub const FIELD_RESOURCE_ID: &str = "resource_id";
pub const FIELD_TENANT_ID: &str = "tenant_id";
pub const FIELD_EXECUTION_STATE: &str = "execution_state";
pub const FIELD_CACHE_REASON: &str = "cache_reason";

// Error fields
pub const FIELD_ERR_KIND: &str = "err.kind";
pub const FIELD_ERR_CODE: &str = "err.code";

// Canonical event names
pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";
pub const EVENT_DEGRADED: &str = "degraded";
