use std::sync::Arc;
use std::time::Duration;

use crate::settings::ReconnectSettings;

/// Decides whether a closed push subscription is reopened.
///
/// `attempt` counts consecutive reopen attempts for the current view, starting at 1.
pub trait ReconnectPolicy: Send + Sync {
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// Closed stays closed until the room view is recreated.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverReconnect;

impl ReconnectPolicy for NeverReconnect {
    fn next_delay(&self, _attempt: u32) -> Option<Duration> {
        None
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedDelay {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy for FixedDelay {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (attempt <= self.max_attempts).then_some(self.delay)
    }
}

pub fn policy_from_settings(settings: ReconnectSettings) -> Arc<dyn ReconnectPolicy> {
    match settings {
        ReconnectSettings::Never => Arc::new(NeverReconnect),
        ReconnectSettings::Fixed {
            delay_ms,
            max_attempts,
        } => Arc::new(FixedDelay {
            delay: Duration::from_millis(delay_ms),
            max_attempts,
        }),
    }
}
