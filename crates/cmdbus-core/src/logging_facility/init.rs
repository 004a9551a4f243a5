//! Process-wide subscriber setup

use serde::{Deserialize, Serialize};
use std::sync::Once;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

/// Output style selected by `[logging] profile`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Human-readable lines, debug level for cmdbus crates
    #[default]
    Development,
    /// One JSON object per event, info level
    Production,
    /// No output; tests install `init_test_capture` instead
    Test,
}

impl Profile {
    /// Filter used when `RUST_LOG` is unset
    pub fn default_directive(self) -> &'static str {
        match self {
            Profile::Development => "cmdbus=debug",
            Profile::Production => "cmdbus=info",
            Profile::Test => "off",
        }
    }

    fn filter(self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.default_directive()))
    }
}

static INIT: Once = Once::new();

/// Install the global subscriber for `profile`
///
/// Later calls, and calls after another subscriber was installed, do
/// nothing. Events are written to stderr.
///
/// ```
/// use cmdbus_core::logging_facility::{init, Profile};
///
/// init(Profile::Production);
/// ```
pub fn init(profile: Profile) {
    INIT.call_once(|| {
        let fmt = tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(profile.filter());
        let installed = match profile {
            Profile::Development => fmt.try_init(),
            Profile::Production => fmt.json().try_init(),
            Profile::Test => tracing_subscriber::registry().try_init().map_err(Into::into),
        };
        // A subscriber set elsewhere (e.g. the test capture) wins.
        installed.ok();
    });
}
