//! In-memory device for hosts without telephony and for tests.
//!
//! A [`SimulatedDevice`] is a cheap clonable handle onto shared state. Hand
//! [`SimulatedDevice::platform`] to the bridge and keep a clone to script
//! OS behavior and inspect what the bridge did.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::platform::{AudioMode, AudioService, CallService, Platform, WindowService};
use crate::BridgeError;

/// Knobs for OS behavior the bridge has to tolerate.
#[derive(Debug, Clone)]
pub struct DeviceBehavior {
    pub call_permission: bool,
    pub grant_focus: bool,
    /// Every audio service call fails as if the service were unreachable.
    pub audio_unreachable: bool,
    /// Dialing resets the speaker off, as vendor call setup often does.
    pub reset_speaker_on_dial: bool,
    /// Writes to the speaker are silently ignored by the hardware.
    pub ignore_speaker_writes: bool,
    /// Switching the audio mode fails; focus and speaker still work.
    pub mode_fails: bool,
    pub dial_fails: bool,
    pub window_fails: bool,
}

impl Default for DeviceBehavior {
    fn default() -> Self {
        Self {
            call_permission: true,
            grant_focus: true,
            audio_unreachable: false,
            reset_speaker_on_dial: false,
            ignore_speaker_writes: false,
            mode_fails: false,
            dial_fails: false,
            window_fails: false,
        }
    }
}

/// Observable device state plus counters of what the bridge asked for.
#[derive(Debug, Clone, Default)]
pub struct DeviceState {
    pub mode: AudioMode,
    pub speaker_on: bool,
    pub focus_held: bool,
    pub focus_requests: usize,
    pub focus_abandons: usize,
    pub speaker_writes: usize,
    pub dialed: Vec<String>,
    pub shown_when_locked: bool,
    pub screen_on: bool,
    pub keyguard_dismiss_requests: usize,
}

#[derive(Debug, Default)]
struct Inner {
    behavior: DeviceBehavior,
    state: DeviceState,
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedDevice {
    inner: Arc<Mutex<Inner>>,
}

impl SimulatedDevice {
    pub fn new(behavior: DeviceBehavior) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                behavior,
                state: DeviceState::default(),
            })),
        }
    }

    pub fn platform(&self) -> Platform {
        Platform {
            audio: Box::new(self.clone()),
            calls: Box::new(self.clone()),
            window: Arc::new(self.clone()),
        }
    }

    pub fn state(&self) -> DeviceState {
        self.lock().state.clone()
    }

    pub fn update_behavior(&self, f: impl FnOnce(&mut DeviceBehavior)) {
        f(&mut self.lock().behavior);
    }

    /// Flip the speaker behind the bridge's back, as another app or the
    /// call stack would.
    pub fn override_speaker(&self, on: bool) {
        self.lock().state.speaker_on = on;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn audio(&self) -> Result<MutexGuard<'_, Inner>, BridgeError> {
        let inner = self.lock();
        if inner.behavior.audio_unreachable {
            return Err(BridgeError::AudioSubsystem(
                "audio service unreachable".to_string(),
            ));
        }
        Ok(inner)
    }
}

impl AudioService for SimulatedDevice {
    fn request_focus(&mut self) -> Result<bool, BridgeError> {
        let mut inner = self.audio()?;
        inner.state.focus_requests += 1;
        let granted = inner.behavior.grant_focus;
        inner.state.focus_held = granted;
        Ok(granted)
    }

    fn abandon_focus(&mut self) -> Result<(), BridgeError> {
        let mut inner = self.audio()?;
        inner.state.focus_abandons += 1;
        inner.state.focus_held = false;
        Ok(())
    }

    fn set_mode(&mut self, mode: AudioMode) -> Result<(), BridgeError> {
        let mut inner = self.audio()?;
        if inner.behavior.mode_fails {
            return Err(BridgeError::AudioSubsystem("setMode rejected".to_string()));
        }
        inner.state.mode = mode;
        Ok(())
    }

    fn set_speakerphone_on(&mut self, on: bool) -> Result<(), BridgeError> {
        let mut inner = self.audio()?;
        inner.state.speaker_writes += 1;
        if !inner.behavior.ignore_speaker_writes {
            inner.state.speaker_on = on;
        }
        Ok(())
    }

    fn is_speakerphone_on(&mut self) -> Result<bool, BridgeError> {
        Ok(self.audio()?.state.speaker_on)
    }
}

impl CallService for SimulatedDevice {
    fn has_call_permission(&mut self) -> Result<bool, BridgeError> {
        Ok(self.lock().behavior.call_permission)
    }

    fn dial(&mut self, number: &str) -> Result<(), BridgeError> {
        let mut inner = self.lock();
        if inner.behavior.dial_fails {
            return Err(BridgeError::CallSetup("no activity handles tel: intent".to_string()));
        }
        inner.state.dialed.push(number.to_string());
        if inner.behavior.reset_speaker_on_dial {
            inner.state.speaker_on = false;
        }
        Ok(())
    }
}

impl WindowService for SimulatedDevice {
    fn show_when_locked(&self) -> Result<(), BridgeError> {
        let mut inner = self.lock();
        if inner.behavior.window_fails {
            return Err(BridgeError::NotSupported);
        }
        inner.state.shown_when_locked = true;
        Ok(())
    }

    fn turn_screen_on(&self) -> Result<(), BridgeError> {
        let mut inner = self.lock();
        if inner.behavior.window_fails {
            return Err(BridgeError::NotSupported);
        }
        inner.state.screen_on = true;
        Ok(())
    }

    fn dismiss_keyguard(&self) -> Result<(), BridgeError> {
        let mut inner = self.lock();
        if inner.behavior.window_fails {
            return Err(BridgeError::NotSupported);
        }
        inner.state.keyguard_dismiss_requests += 1;
        Ok(())
    }
}
