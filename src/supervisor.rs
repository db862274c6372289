use tracing::{info, warn};

use crate::audio::{ClaimId, DeviceAudioController};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SupervisorState {
    AwaitingSettle,
    Verified,
}

/// Result of the single delayed recheck of the speaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationOutcome {
    pub expected: bool,
    /// Speaker state found at settle time. An unreadable state counts as
    /// not matching.
    pub observed: bool,
    /// Speaker state after any correction.
    pub actual: bool,
    /// A corrective write was issued and accepted by the service.
    pub corrected: bool,
    /// A later acquisition or a release owns routing now; no correction made.
    pub superseded: bool,
}

impl VerificationOutcome {
    pub fn mismatch(&self) -> bool {
        self.observed != self.expected
    }
}

/// Single-shot settle check for one request.
///
/// `settle` runs on the control thread after the settle interval. It
/// re-asserts the expected speaker state at most once and then stays
/// `Verified`; further calls yield nothing.
#[derive(Debug)]
pub(crate) struct VerificationSupervisor {
    owner: String,
    claim: Option<ClaimId>,
    expected: bool,
    reassert: bool,
    state: SupervisorState,
}

impl VerificationSupervisor {
    pub fn new(
        owner: impl Into<String>,
        claim: Option<ClaimId>,
        expected: bool,
        reassert: bool,
    ) -> Self {
        Self {
            owner: owner.into(),
            claim,
            expected,
            reassert,
            state: SupervisorState::AwaitingSettle,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn settle(&mut self, audio: &mut DeviceAudioController) -> Option<VerificationOutcome> {
        if self.state == SupervisorState::Verified {
            return None;
        }
        self.state = SupervisorState::Verified;

        let owner = self.owner.as_str();
        let expected = self.expected;
        let observed = match audio.read_speaker() {
            Ok(on) => on,
            Err(e) => {
                warn!(owner, error = %e, "speaker state unreadable at settle time");
                !expected
            }
        };
        let superseded = audio.active_claim() != self.claim;

        let mut outcome = VerificationOutcome {
            expected,
            observed,
            actual: observed,
            corrected: false,
            superseded,
        };

        if observed == expected {
            info!(owner, expected, "speaker state verified");
            return Some(outcome);
        }

        if superseded {
            info!(
                owner,
                expected, observed, "routing superseded, leaving speaker state alone"
            );
            return Some(outcome);
        }

        if !self.reassert {
            warn!(owner, expected, observed, "speaker mismatch accepted");
            return Some(outcome);
        }

        warn!(owner, expected, observed, "speaker did not settle, re-asserting once");
        match audio.write_speaker(expected) {
            Ok(()) => outcome.corrected = true,
            Err(e) => warn!(owner, error = %e, "corrective speaker write failed"),
        }
        outcome.actual = match audio.read_speaker() {
            Ok(on) => on,
            Err(e) => {
                warn!(owner, error = %e, "speaker state unreadable after correction");
                false
            }
        };
        if outcome.actual != expected {
            warn!(
                owner,
                expected,
                actual = outcome.actual,
                "speaker still overridden, accepting degraded state"
            );
        }

        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::simulated::{DeviceBehavior, SimulatedDevice};

    fn acquired(
        behavior: DeviceBehavior,
    ) -> (DeviceAudioController, SimulatedDevice, Option<ClaimId>) {
        let device = SimulatedDevice::new(behavior);
        let mut audio = DeviceAudioController::new(Box::new(device.clone()));
        let claim = audio.acquire_voice_routing(true, "call").unwrap().claim;
        (audio, device, Some(claim))
    }

    #[test]
    fn matching_state_needs_no_write() {
        let (mut audio, device, claim) = acquired(DeviceBehavior::default());
        let writes = device.state().speaker_writes;
        let mut supervisor = VerificationSupervisor::new("call", claim, true, true);

        let outcome = supervisor.settle(&mut audio).unwrap();

        assert!(!outcome.mismatch());
        assert!(!outcome.corrected);
        assert!(outcome.actual);
        assert_eq!(device.state().speaker_writes, writes);
        assert_eq!(supervisor.state(), SupervisorState::Verified);
    }

    #[test]
    fn mismatch_is_corrected_exactly_once() {
        let (mut audio, device, claim) = acquired(DeviceBehavior::default());
        device.override_speaker(false);
        let writes = device.state().speaker_writes;
        let mut supervisor = VerificationSupervisor::new("call", claim, true, true);

        let outcome = supervisor.settle(&mut audio).unwrap();

        assert!(outcome.mismatch());
        assert!(outcome.corrected);
        assert!(outcome.actual);
        assert_eq!(device.state().speaker_writes, writes + 1);
        assert!(device.state().speaker_on);
    }

    #[test]
    fn second_settle_yields_nothing() {
        let (mut audio, device, claim) = acquired(DeviceBehavior::default());
        device.override_speaker(false);
        let mut supervisor = VerificationSupervisor::new("call", claim, true, true);

        assert!(supervisor.settle(&mut audio).is_some());
        device.override_speaker(false);
        let writes = device.state().speaker_writes;

        assert!(supervisor.settle(&mut audio).is_none());
        assert_eq!(device.state().speaker_writes, writes);
    }

    #[test]
    fn persistent_override_is_accepted_after_one_write() {
        let (mut audio, device, claim) = acquired(DeviceBehavior::default());
        device.update_behavior(|b| b.ignore_speaker_writes = true);
        device.override_speaker(false);
        let writes = device.state().speaker_writes;
        let mut supervisor = VerificationSupervisor::new("call", claim, true, true);

        let outcome = supervisor.settle(&mut audio).unwrap();

        assert!(outcome.corrected);
        assert!(!outcome.actual);
        assert_eq!(device.state().speaker_writes, writes + 1);
    }

    #[test]
    fn superseded_claim_is_not_corrected() {
        let (mut audio, device, first) = acquired(DeviceBehavior::default());
        audio.acquire_voice_routing(false, "second").unwrap();
        let writes = device.state().speaker_writes;
        let mut supervisor = VerificationSupervisor::new("first", first, true, true);

        let outcome = supervisor.settle(&mut audio).unwrap();

        assert!(outcome.superseded);
        assert!(outcome.mismatch());
        assert!(!outcome.corrected);
        assert_eq!(device.state().speaker_writes, writes);
    }

    #[test]
    fn released_routing_counts_as_superseded() {
        let (mut audio, device, claim) = acquired(DeviceBehavior::default());
        audio.release_voice_routing();
        device.override_speaker(false);
        let mut supervisor = VerificationSupervisor::new("call", claim, true, true);

        let outcome = supervisor.settle(&mut audio).unwrap();

        assert!(outcome.superseded);
        assert!(!outcome.corrected);
        assert!(!device.state().speaker_on);
    }

    #[test]
    fn reassert_disabled_only_reports() {
        let (mut audio, device, claim) = acquired(DeviceBehavior::default());
        device.override_speaker(false);
        let mut supervisor = VerificationSupervisor::new("call", claim, true, false);

        let outcome = supervisor.settle(&mut audio).unwrap();

        assert!(outcome.mismatch());
        assert!(!outcome.corrected);
        assert!(!device.state().speaker_on);
    }
}
