use std::sync::Arc;

use tracing::{debug, warn};

use crate::platform::WindowService;

/// Where an emergency activation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationSource {
    /// Host component created with the trigger.
    Launch,
    /// Trigger redelivered while already running.
    Redelivery,
    /// Returned to foreground with the emergency screen pending.
    Foreground,
}

/// Turns the display on and gets the emergency UI past the lock screen.
/// Every step is a hint; failures are logged and never returned.
#[derive(Clone)]
pub(crate) struct WakeCoordinator {
    window: Arc<dyn WindowService>,
}

impl WakeCoordinator {
    pub fn new(window: Arc<dyn WindowService>) -> Self {
        Self { window }
    }

    pub fn force_visible_and_unlocked(&self) {
        debug!("forcing emergency screen visible");

        if let Err(e) = self.window.show_when_locked() {
            warn!(error = %e, "show-when-locked not applied");
        }
        if let Err(e) = self.window.turn_screen_on() {
            warn!(error = %e, "turn-screen-on not applied");
        }
        if let Err(e) = self.window.dismiss_keyguard() {
            warn!(error = %e, "keyguard dismiss request failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::simulated::{DeviceBehavior, SimulatedDevice};

    #[test]
    fn applies_all_hints() {
        let device = SimulatedDevice::default();
        let wake = WakeCoordinator::new(Arc::new(device.clone()));

        wake.force_visible_and_unlocked();

        let state = device.state();
        assert!(state.shown_when_locked);
        assert!(state.screen_on);
        assert_eq!(state.keyguard_dismiss_requests, 1);
    }

    #[test]
    fn idempotent_across_entry_points() {
        let device = SimulatedDevice::default();
        let wake = WakeCoordinator::new(Arc::new(device.clone()));

        wake.force_visible_and_unlocked();
        wake.force_visible_and_unlocked();

        let state = device.state();
        assert!(state.shown_when_locked);
        assert!(state.screen_on);
        assert_eq!(state.keyguard_dismiss_requests, 2);
    }

    #[test]
    fn window_failures_are_swallowed() {
        let device = SimulatedDevice::new(DeviceBehavior {
            window_fails: true,
            ..Default::default()
        });
        let wake = WakeCoordinator::new(Arc::new(device.clone()));

        wake.force_visible_and_unlocked();

        assert!(!device.state().screen_on);
    }
}
