use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use tracing::{error, info, warn};

use crate::audio::DeviceAudioController;
use crate::platform::CallService;
use crate::BridgeError;

/// A dial string as handed to the dialer. Only surrounding whitespace is
/// removed; pause and wait separators, vanity letters and the rest are kept.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    pub fn parse(raw: &str) -> Result<Self, BridgeError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(BridgeError::InvalidArgument(
                "phone number is empty".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PhoneNumber {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One attempt to reach a number hands-free.
#[derive(Debug, Clone)]
pub struct EmergencyCallRequest {
    pub id: u64,
    pub phone_number: PhoneNumber,
    pub requested_at: SystemTime,
}

impl EmergencyCallRequest {
    pub fn new(id: u64, phone_number: PhoneNumber) -> Self {
        Self {
            id,
            phone_number,
            requested_at: SystemTime::now(),
        }
    }

    pub(crate) fn owner(&self) -> String {
        format!("emergency-call#{}", self.id)
    }
}

/// Returned as soon as the call intent is handed to the dialer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallLaunchResult {
    pub dispatched: bool,
    pub speaker_active_at_dispatch: bool,
    pub focus_granted: bool,
}

pub(crate) struct CallLauncher {
    calls: Box<dyn CallService>,
}

impl CallLauncher {
    pub fn new(calls: Box<dyn CallService>) -> Self {
        Self { calls }
    }

    /// Check permission, claim voice routing, then dispatch the call.
    ///
    /// Routing is claimed before dispatch because call setup may itself
    /// reset routing. A routing failure is logged and the call still goes
    /// out. Missing permission rejects the request before anything changes.
    pub fn initiate_emergency_call(
        &mut self,
        audio: &mut DeviceAudioController,
        request: &EmergencyCallRequest,
        enable_speaker: bool,
    ) -> Result<CallLaunchResult, BridgeError> {
        let owner = request.owner();

        let permitted = self.calls.has_call_permission().map_err(|e| {
            BridgeError::CallSetup(format!("could not check call permission: {e}"))
        })?;
        if !permitted {
            warn!(owner = %owner, "outbound call permission not granted");
            return Err(BridgeError::PermissionDenied);
        }

        let (speaker_active_at_dispatch, focus_granted) =
            match audio.acquire_voice_routing(enable_speaker, &owner) {
                Ok(routing) => (routing.actual, routing.focus_granted),
                Err(e) => {
                    error!(owner = %owner, error = %e, "voice routing failed, dialing anyway");
                    (false, false)
                }
            };

        if let Err(e) = self.calls.dial(request.phone_number.as_str()) {
            error!(owner = %owner, error = %e, "call dispatch failed");
            audio.release_voice_routing();
            return Err(match e {
                BridgeError::CallSetup(_) | BridgeError::PermissionDenied => e,
                other => BridgeError::CallSetup(other.to_string()),
            });
        }

        info!(owner = %owner, number = %request.phone_number, "emergency call dispatched");

        Ok(CallLaunchResult {
            dispatched: true,
            speaker_active_at_dispatch,
            focus_granted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::simulated::{DeviceBehavior, SimulatedDevice};
    use crate::platform::AudioMode;

    fn setup(behavior: DeviceBehavior) -> (CallLauncher, DeviceAudioController, SimulatedDevice) {
        let device = SimulatedDevice::new(behavior);
        (
            CallLauncher::new(Box::new(device.clone())),
            DeviceAudioController::new(Box::new(device.clone())),
            device,
        )
    }

    fn request(number: &str) -> EmergencyCallRequest {
        EmergencyCallRequest::new(1, PhoneNumber::parse(number).unwrap())
    }

    #[test]
    fn phone_number_is_trimmed_only() {
        assert_eq!(PhoneNumber::parse(" 112 ").unwrap().as_str(), "112");
        assert_eq!(
            PhoneNumber::parse("+1 (555) 010-2030").unwrap().as_str(),
            "+1 (555) 010-2030"
        );
        assert_eq!(PhoneNumber::parse("*31#112").unwrap().to_string(), "*31#112");
        assert_eq!(PhoneNumber::parse("\t112p1\n").unwrap().as_str(), "112p1");
    }

    #[test]
    fn blank_phone_number_rejected() {
        for raw in ["", "   ", "\t\n"] {
            assert!(
                matches!(PhoneNumber::parse(raw), Err(BridgeError::InvalidArgument(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn dial_strings_pass_through_to_dialer() {
        let (mut launcher, mut audio, device) = setup(DeviceBehavior::default());
        let numbers = ["+1 555 0100,,123", "112;1", "1-800-FLOWERS", "112p1", "112w4"];

        for number in numbers {
            let result = launcher
                .initiate_emergency_call(&mut audio, &request(number), true)
                .unwrap();
            assert!(result.dispatched);
        }

        assert_eq!(device.state().dialed, numbers.map(String::from).to_vec());
    }

    #[test]
    fn dispatches_with_speaker_on() {
        let (mut launcher, mut audio, device) = setup(DeviceBehavior::default());

        let result = launcher
            .initiate_emergency_call(&mut audio, &request("112"), true)
            .unwrap();

        assert!(result.dispatched);
        assert!(result.speaker_active_at_dispatch);
        assert!(result.focus_granted);
        assert_eq!(device.state().dialed, vec!["112".to_string()]);
        assert_eq!(device.state().mode, AudioMode::InCall);
    }

    #[test]
    fn permission_denied_touches_nothing() {
        let (mut launcher, mut audio, device) = setup(DeviceBehavior {
            call_permission: false,
            ..Default::default()
        });

        let err = launcher
            .initiate_emergency_call(&mut audio, &request("112"), true)
            .unwrap_err();

        assert!(matches!(err, BridgeError::PermissionDenied));
        let state = device.state();
        assert!(state.dialed.is_empty());
        assert_eq!(state.focus_requests, 0);
        assert_eq!(state.mode, AudioMode::Normal);
        assert!(audio.active_claim().is_none());
    }

    #[test]
    fn dispatches_without_focus() {
        let (mut launcher, mut audio, device) = setup(DeviceBehavior {
            grant_focus: false,
            ..Default::default()
        });

        let result = launcher
            .initiate_emergency_call(&mut audio, &request("112"), true)
            .unwrap();

        assert!(result.dispatched);
        assert!(!result.focus_granted);
        assert_eq!(device.state().dialed.len(), 1);
    }

    #[test]
    fn dispatches_when_audio_unreachable() {
        let (mut launcher, mut audio, device) = setup(DeviceBehavior {
            audio_unreachable: true,
            ..Default::default()
        });

        let result = launcher
            .initiate_emergency_call(&mut audio, &request("112"), true)
            .unwrap();

        assert!(result.dispatched);
        assert!(!result.speaker_active_at_dispatch);
        assert_eq!(device.state().dialed.len(), 1);
    }

    #[test]
    fn routing_is_claimed_before_dispatch() {
        let (mut launcher, mut audio, device) = setup(DeviceBehavior {
            reset_speaker_on_dial: true,
            ..Default::default()
        });

        let result = launcher
            .initiate_emergency_call(&mut audio, &request("112"), true)
            .unwrap();

        // Speaker was on when read back, then the dialer reset it.
        assert!(result.speaker_active_at_dispatch);
        assert!(!device.state().speaker_on);
    }

    #[test]
    fn dial_failure_releases_routing() {
        let (mut launcher, mut audio, device) = setup(DeviceBehavior {
            dial_fails: true,
            ..Default::default()
        });

        let err = launcher
            .initiate_emergency_call(&mut audio, &request("112"), true)
            .unwrap_err();

        assert!(matches!(err, BridgeError::CallSetup(_)));
        assert!(audio.active_claim().is_none());
        assert_eq!(device.state().mode, AudioMode::Normal);
        assert_eq!(device.state().focus_abandons, 1);
    }
}
