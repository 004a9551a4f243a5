//! Undo token type
//!
//! An undo token authorises exactly one reversal of one command execution.
//! It is a bearer credential, so `Debug` and `Display` never print it.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UndoToken(String);

impl UndoToken {
    /// Issue a fresh random token
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Wrap a token presented by a caller
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Expose the raw token value
    ///
    /// Only persistence and the caller that receives the token should need this.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UndoToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UndoToken(***REDACTED***)")
    }
}

impl fmt::Display for UndoToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "***REDACTED***")
    }
}
