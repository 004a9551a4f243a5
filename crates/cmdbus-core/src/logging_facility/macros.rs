//! Lifecycle logging macros
//!
//! Each expands to one `tracing` event stamped with `component`, `op` and
//! `event`; any trailing `key = value` pairs are passed through unchanged.
//! Only the engine entry points emit start/end pairs.

/// `event=start` at INFO
///
/// ```
/// # use cmdbus_core::log_op_start;
/// log_op_start!("command_execute");
/// log_op_start!("command_execute", command_id = "widgets.create");
/// ```
#[macro_export]
macro_rules! log_op_start {
    ($op:expr $(, $($field:tt)*)?) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::schema::EVENT_START
            $(, $($field)*)?
        )
    };
}

/// `event=end` at INFO; `duration_ms` is mandatory
///
/// ```
/// # use cmdbus_core::log_op_end;
/// log_op_end!("command_execute", duration_ms = 42);
/// ```
#[macro_export]
macro_rules! log_op_end {
    ($op:expr, duration_ms = $duration:expr $(, $($field:tt)*)?) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::schema::EVENT_END,
            duration_ms = $duration
            $(, $($field)*)?
        )
    };
}

/// `event=end_error` at ERROR with the error's kind, code and request id
///
/// `$err` is anything convertible into `ExError`.
///
/// ```
/// # use cmdbus_core::{log_op_error, errors::ExError};
/// let err = ExError::not_available("Undo is not available");
/// log_op_error!("command_undo", err, duration_ms = 3);
/// ```
#[macro_export]
macro_rules! log_op_error {
    ($op:expr, $err:expr, duration_ms = $duration:expr $(, $($field:tt)*)?) => {{
        let ex_err: $crate::errors::ExError = $err.into();
        tracing::error!(
            component = module_path!(),
            op = $op,
            event = $crate::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err.kind = ?ex_err.kind(),
            err.code = ex_err.code(),
            request_id = ex_err.request_id().map(|id| id.as_str())
            $(, $($field)*)?
        );
    }};
}

/// `event=degraded` at WARN for a side effect that failed and was swallowed
///
/// ```
/// # use cmdbus_core::{log_degraded, errors::ExError, errors::ExErrorKind};
/// let err = ExError::new(ExErrorKind::DegradedDependency).with_message("cache down");
/// log_degraded!("cache_invalidate", err, cache_reason = "command:widgets.create:execute");
/// ```
#[macro_export]
macro_rules! log_degraded {
    ($op:expr, $err:expr $(, $($field:tt)*)?) => {{
        let ex_err: &$crate::errors::ExError = &$err;
        tracing::warn!(
            component = module_path!(),
            op = $op,
            event = $crate::schema::EVENT_DEGRADED,
            err.code = ex_err.code(),
            message = ex_err.message()
            $(, $($field)*)?
        );
    }};
}
