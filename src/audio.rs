use tracing::{debug, info, warn};

use crate::platform::{AudioMode, AudioService};
use crate::BridgeError;

/// Identifies one acquisition of voice routing. Later claims compare greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClaimId(u64);

/// The bridge's view of the device audio output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioRoutingState {
    pub mode: AudioMode,
    pub speaker_enabled: bool,
    pub focus_held: bool,
}

/// An exclusive claim on the audio subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AudioFocusHandle {
    pub claim: ClaimId,
    pub granted: bool,
    pub owner: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingResult {
    pub claim: ClaimId,
    pub requested: bool,
    /// Speaker state read back from the hardware after the write.
    pub actual: bool,
    pub focus_granted: bool,
}

impl RoutingResult {
    /// Routing done without granted focus may be overridden at any time.
    pub fn is_authoritative(&self) -> bool {
        self.focus_granted
    }

    pub fn took_effect(&self) -> bool {
        self.requested == self.actual
    }
}

/// Sole writer of audio focus, mode and speaker routing.
///
/// At most one [`AudioFocusHandle`] is held. Acquiring again replaces the
/// previous handle, and the held handle is released when the controller is
/// dropped.
pub(crate) struct DeviceAudioController {
    service: Box<dyn AudioService>,
    focus: Option<AudioFocusHandle>,
    state: AudioRoutingState,
    next_claim: u64,
}

impl DeviceAudioController {
    pub fn new(service: Box<dyn AudioService>) -> Self {
        Self {
            service,
            focus: None,
            state: AudioRoutingState::default(),
            next_claim: 0,
        }
    }

    /// Claim focus, switch to voice-call mode and set the speaker.
    ///
    /// Focus denial does not abort: routing proceeds best-effort and the
    /// result reports `focus_granted = false`. Only a failing mode or
    /// speaker write is an error, and then the new handle is released
    /// before returning so nothing stays held.
    pub fn acquire_voice_routing(
        &mut self,
        enable_speaker: bool,
        owner: &str,
    ) -> Result<RoutingResult, BridgeError> {
        if let Some(prior) = self.focus.take() {
            debug!(owner = %prior.owner, "superseding held audio focus");
            self.abandon(&prior);
        }

        self.next_claim += 1;
        let claim = ClaimId(self.next_claim);

        let granted = match self.service.request_focus() {
            Ok(granted) => granted,
            Err(e) => {
                warn!(error = %e, owner, "audio focus request failed");
                false
            }
        };
        if !granted {
            warn!(owner, "audio focus not granted, routing is best-effort");
        }
        self.focus = Some(AudioFocusHandle {
            claim,
            granted,
            owner: owner.to_string(),
        });
        self.state.focus_held = granted;

        let actual = match self.route(enable_speaker) {
            Ok(actual) => actual,
            Err(e) => {
                warn!(owner, error = %e, "voice routing failed, releasing focus");
                self.release_voice_routing();
                return Err(e);
            }
        };

        info!(
            owner,
            requested = enable_speaker,
            actual,
            focus_granted = granted,
            "voice routing acquired"
        );

        Ok(RoutingResult {
            claim,
            requested: enable_speaker,
            actual,
            focus_granted: granted,
        })
    }

    /// Release the held focus and return to normal mode.
    /// Returns false without touching anything when no handle is held.
    pub fn release_voice_routing(&mut self) -> bool {
        let Some(handle) = self.focus.take() else {
            return false;
        };

        self.abandon(&handle);
        if let Err(e) = self.service.set_mode(AudioMode::Normal) {
            warn!(error = %e, "failed to restore normal audio mode");
        }
        self.state.mode = AudioMode::Normal;
        self.state.focus_held = false;

        info!(owner = %handle.owner, "voice routing released");
        true
    }

    fn route(&mut self, enable_speaker: bool) -> Result<bool, BridgeError> {
        self.service.set_mode(AudioMode::InCall)?;
        self.state.mode = AudioMode::InCall;
        self.service.set_speakerphone_on(enable_speaker)?;
        self.read_speaker()
    }

    /// Read the hardware speaker state into the routing state.
    pub fn read_speaker(&mut self) -> Result<bool, BridgeError> {
        let on = self.service.is_speakerphone_on()?;
        self.state.speaker_enabled = on;
        Ok(on)
    }

    pub fn write_speaker(&mut self, on: bool) -> Result<(), BridgeError> {
        self.service.set_speakerphone_on(on)
    }

    pub fn active_claim(&self) -> Option<ClaimId> {
        self.focus.as_ref().map(|h| h.claim)
    }

    pub fn state(&self) -> AudioRoutingState {
        self.state
    }

    fn abandon(&mut self, handle: &AudioFocusHandle) {
        if !handle.granted {
            return;
        }
        if let Err(e) = self.service.abandon_focus() {
            warn!(error = %e, owner = %handle.owner, "failed to abandon audio focus");
        }
    }
}

impl Drop for DeviceAudioController {
    fn drop(&mut self) {
        self.release_voice_routing();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::simulated::{DeviceBehavior, SimulatedDevice};

    fn controller(behavior: DeviceBehavior) -> (DeviceAudioController, SimulatedDevice) {
        let device = SimulatedDevice::new(behavior);
        (DeviceAudioController::new(Box::new(device.clone())), device)
    }

    #[test]
    fn acquire_sets_in_call_mode_and_speaker() {
        let (mut audio, device) = controller(DeviceBehavior::default());

        let result = audio.acquire_voice_routing(true, "test").unwrap();

        assert!(result.focus_granted);
        assert!(result.actual);
        assert!(result.took_effect());
        let state = device.state();
        assert_eq!(state.mode, AudioMode::InCall);
        assert!(state.speaker_on);
        assert!(state.focus_held);
        assert_eq!(audio.state().mode, AudioMode::InCall);
    }

    #[test]
    fn focus_denial_is_best_effort() {
        let (mut audio, device) = controller(DeviceBehavior {
            grant_focus: false,
            ..Default::default()
        });

        let result = audio.acquire_voice_routing(true, "test").unwrap();

        assert!(!result.is_authoritative());
        assert!(result.actual);
        assert!(device.state().speaker_on);
        assert!(!audio.state().focus_held);
    }

    #[test]
    fn unreachable_service_is_an_audio_error() {
        let (mut audio, _device) = controller(DeviceBehavior {
            audio_unreachable: true,
            ..Default::default()
        });

        let err = audio.acquire_voice_routing(true, "test").unwrap_err();
        assert!(matches!(err, BridgeError::AudioSubsystem(_)));
    }

    #[test]
    fn failed_mode_switch_releases_focus() {
        let (mut audio, device) = controller(DeviceBehavior {
            mode_fails: true,
            ..Default::default()
        });

        let err = audio.acquire_voice_routing(true, "test").unwrap_err();

        assert!(matches!(err, BridgeError::AudioSubsystem(_)));
        assert!(audio.active_claim().is_none());
        assert!(!audio.state().focus_held);
        assert_eq!(audio.state().mode, AudioMode::Normal);
        let state = device.state();
        assert_eq!(state.focus_requests, 1);
        assert_eq!(state.focus_abandons, 1);
        assert!(!state.focus_held);
    }

    #[test]
    fn reacquire_replaces_prior_handle() {
        let (mut audio, device) = controller(DeviceBehavior::default());

        let first = audio.acquire_voice_routing(true, "first").unwrap();
        let second = audio.acquire_voice_routing(true, "second").unwrap();

        assert!(second.claim > first.claim);
        assert_eq!(audio.active_claim(), Some(second.claim));
        let state = device.state();
        assert_eq!(state.focus_requests, 2);
        assert_eq!(state.focus_abandons, 1);
    }

    #[test]
    fn release_without_handle_is_noop() {
        let (mut audio, device) = controller(DeviceBehavior::default());

        assert!(!audio.release_voice_routing());
        assert_eq!(audio.state(), AudioRoutingState::default());
        assert_eq!(device.state().focus_abandons, 0);
    }

    #[test]
    fn release_happens_once() {
        let (mut audio, device) = controller(DeviceBehavior::default());
        audio.acquire_voice_routing(true, "test").unwrap();

        assert!(audio.release_voice_routing());
        assert!(!audio.release_voice_routing());

        let state = device.state();
        assert_eq!(state.focus_abandons, 1);
        assert_eq!(state.mode, AudioMode::Normal);
        assert!(!state.focus_held);
    }

    #[test]
    fn drop_releases_held_focus() {
        let (mut audio, device) = controller(DeviceBehavior::default());
        audio.acquire_voice_routing(true, "test").unwrap();

        drop(audio);

        let state = device.state();
        assert_eq!(state.focus_abandons, 1);
        assert_eq!(state.mode, AudioMode::Normal);
    }

    #[test]
    fn denied_focus_is_not_abandoned() {
        let (mut audio, device) = controller(DeviceBehavior {
            grant_focus: false,
            ..Default::default()
        });
        audio.acquire_voice_routing(true, "test").unwrap();

        assert!(audio.release_voice_routing());
        assert_eq!(device.state().focus_abandons, 0);
        assert_eq!(device.state().mode, AudioMode::Normal);
    }
}
