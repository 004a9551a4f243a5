use cmdbus_core_types::{RequestId, TraceId};
use thiserror::Error;

/// Result type alias using the structured error facility
pub type Result<T> = std::result::Result<T, ExError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Every error that leaves the bus carries one of these kinds. Each kind maps
/// to a stable code for programmatic handling and to an HTTP status for the
/// API layer built on top of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExErrorKind {
    /// Registration defect: unknown command id, missing collaborator
    Configuration,
    /// Command-specific input rejected before mutation
    Validation,
    /// Command-specific invariant violation (duplicate code, referenced record, ...)
    DomainConflict,
    /// Undo/redo target missing, in the wrong state, or out of scope.
    /// Deliberately generic so callers cannot probe for inaccessible records.
    NotAvailable,
    /// Encryption or cache collaborator failed; recovered locally
    DegradedDependency,

    // Integration/IO
    Persistence,
    Serialization,
    Io,

    // Internal
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::Configuration => "ERR_CONFIGURATION",
            ExErrorKind::Validation => "ERR_VALIDATION",
            ExErrorKind::DomainConflict => "ERR_DOMAIN_CONFLICT",
            ExErrorKind::NotAvailable => "ERR_NOT_AVAILABLE",
            ExErrorKind::DegradedDependency => "ERR_DEGRADED_DEPENDENCY",
            ExErrorKind::Persistence => "ERR_PERSISTENCE",
            ExErrorKind::Serialization => "ERR_SERIALIZATION",
            ExErrorKind::Io => "ERR_IO",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }

    /// HTTP status an API layer should answer with.
    ///
    /// `NotAvailable` is a plain 400, never 404, so undo tokens and log ids
    /// cannot be enumerated.
    pub fn http_status(&self) -> u16 {
        match self {
            ExErrorKind::Validation | ExErrorKind::NotAvailable => 400,
            ExErrorKind::DomainConflict => 409,
            ExErrorKind::Configuration => 422,
            ExErrorKind::DegradedDependency => 503,
            ExErrorKind::Persistence
            | ExErrorKind::Serialization
            | ExErrorKind::Io
            | ExErrorKind::Internal => 500,
        }
    }
}

/// Canonical structured error type
///
/// Classification fields support programmatic handling; the context fields
/// (`op`, `command_id`, `log_id`, `resource_id`) support debugging.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    command_id: Option<String>,
    log_id: Option<String>,
    resource_id: Option<String>,
    request_id: Option<RequestId>,
    trace_id: Option<TraceId>,
    message: String,
    source: Option<Box<ExError>>,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            command_id: None,
            log_id: None,
            resource_id: None,
            request_id: None,
            trace_id: None,
            message: String::new(),
            source: None,
        }
    }

    /// Shorthand for a `Validation` error raised by a command handler
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ExErrorKind::Validation).with_message(message)
    }

    /// Shorthand for a `DomainConflict` error raised by a command handler
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ExErrorKind::DomainConflict).with_message(message)
    }

    /// Shorthand for the generic `NotAvailable` error
    pub fn not_available(message: impl Into<String>) -> Self {
        Self::new(ExErrorKind::NotAvailable).with_message(message)
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add command id context
    pub fn with_command_id(mut self, id: impl Into<String>) -> Self {
        self.command_id = Some(id.into());
        self
    }

    /// Add action log entry id context
    pub fn with_log_id(mut self, id: impl Into<String>) -> Self {
        self.log_id = Some(id.into());
        self
    }

    /// Add resource id context
    pub fn with_resource_id(mut self, id: impl Into<String>) -> Self {
        self.resource_id = Some(id.into());
        self
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Add source error
    pub fn with_source(mut self, source: ExError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn http_status(&self) -> u16 {
        self.kind.http_status()
    }

    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    pub fn command_id(&self) -> Option<&str> {
        self.command_id.as_deref()
    }

    pub fn log_id(&self) -> Option<&str> {
        self.log_id.as_deref()
    }

    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    pub fn trace_id(&self) -> Option<&TraceId> {
        self.trace_id.as_ref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn source_error(&self) -> Option<&ExError> {
        self.source.as_deref()
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(command_id) = &self.command_id {
            write!(f, " (command_id: {})", command_id)?;
        }
        if let Some(log_id) = &self.log_id {
            write!(f, " (log_id: {})", log_id)?;
        }
        if let Some(resource_id) = &self.resource_id {
            write!(f, " (resource_id: {})", resource_id)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<serde_json::Error> for ExError {
    fn from(err: serde_json::Error) -> Self {
        ExError::new(ExErrorKind::Serialization).with_message(err.to_string())
    }
}

// ========== End Error Facility ==========

/// Named failure cases of the command lifecycle
///
/// Bus internals raise these; they convert into `ExError` at the boundary so
/// callers only ever match on `ExErrorKind`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    // ===== Registration =====
    #[error("Command not registered: {command_id}")]
    UnknownCommand { command_id: String },

    #[error("Required collaborator is not registered in the container: {service}")]
    MissingService { service: String },

    // ===== Undo / redo availability =====
    #[error("Undo token is unknown or already used")]
    UndoTokenNotFound,

    #[error("Action log entry not found: {log_id}")]
    EntryNotFound { log_id: String },

    #[error("Action log entry {log_id} is {state}, expected {expected}")]
    EntryStateMismatch {
        log_id: String,
        state: String,
        expected: String,
    },

    #[error("Command {command_id} has no undo handler")]
    UndoHandlerMissing { command_id: String },

    #[error("Entry {log_id} is not the most recently undone entry in scope")]
    RedoOutOfOrder { log_id: String },

    #[error("Entry {log_id} carries no redo input and command {command_id} is not an update")]
    RedoInputUnavailable { log_id: String, command_id: String },

    #[error("Entry {log_id} is outside the caller's scope")]
    OutOfScope { log_id: String },

    #[error("Nothing to {action} for the current actor")]
    NothingToReplay { action: String },

    // ===== Handler input =====
    #[error("Invalid command input: {reason}")]
    InvalidInput { reason: String },

    // ===== Generic =====
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<CommandError> for ExError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::UnknownCommand { command_id } => {
                ExError::new(ExErrorKind::Configuration)
                    .with_op("resolve_command")
                    .with_command_id(command_id)
                    .with_message("Command not registered")
            }

            CommandError::MissingService { service } => ExError::new(ExErrorKind::Configuration)
                .with_op("resolve_service")
                .with_message(format!("Service not registered: {}", service)),

            // Availability failures all collapse into the same generic kind.
            CommandError::UndoTokenNotFound => ExError::new(ExErrorKind::NotAvailable)
                .with_op("undo")
                .with_message("Undo is not available"),

            CommandError::EntryNotFound { log_id } => ExError::new(ExErrorKind::NotAvailable)
                .with_log_id(log_id)
                .with_message("Action is not available"),

            CommandError::EntryStateMismatch { log_id, .. } => {
                ExError::new(ExErrorKind::NotAvailable)
                    .with_log_id(log_id)
                    .with_message("Action is not available")
            }

            CommandError::UndoHandlerMissing { command_id } => {
                ExError::new(ExErrorKind::NotAvailable)
                    .with_op("undo")
                    .with_command_id(command_id)
                    .with_message("Undo is not available")
            }

            CommandError::RedoOutOfOrder { log_id } => ExError::new(ExErrorKind::NotAvailable)
                .with_op("redo")
                .with_log_id(log_id)
                .with_message("Redo is not available"),

            CommandError::RedoInputUnavailable { log_id, command_id } => {
                ExError::new(ExErrorKind::NotAvailable)
                    .with_op("redo")
                    .with_log_id(log_id)
                    .with_command_id(command_id)
                    .with_message("Redo is not available")
            }

            CommandError::OutOfScope { log_id } => ExError::new(ExErrorKind::NotAvailable)
                .with_log_id(log_id)
                .with_message("Action is not available"),

            CommandError::NothingToReplay { action } => ExError::new(ExErrorKind::NotAvailable)
                .with_op(action)
                .with_message("Nothing available"),

            CommandError::InvalidInput { reason } => ExError::new(ExErrorKind::Validation)
                .with_message(format!("Invalid command input: {}", reason)),

            CommandError::Serialization { message } => {
                ExError::new(ExErrorKind::Serialization).with_message(message)
            }

            CommandError::Internal { message } => {
                ExError::new(ExErrorKind::Internal).with_message(message)
            }
        }
    }
}
