mod audio;
mod call;
pub mod channel;
mod control;
pub mod platform;
mod supervisor;
mod wake;

use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{error, info};

pub use audio::{AudioRoutingState, ClaimId, RoutingResult};
pub use call::{CallLaunchResult, EmergencyCallRequest, PhoneNumber};
pub use platform::AudioMode;
pub use supervisor::VerificationOutcome;
pub use wake::ActivationSource;

use control::Command;
use wake::WakeCoordinator;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Delay before rechecking the speaker after a routing change.
    /// Must outlast the platform's own call-setup audio reconfiguration.
    pub settle_interval: Duration,
    /// Speaker state requested for emergency calls.
    pub speaker_on_call: bool,
    /// Re-assert the expected speaker state once when it has drifted.
    pub reassert_on_mismatch: bool,
    /// Verify `set_speakerphone_on` when the immediate read-back disagrees.
    pub verify_speaker_changes: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            settle_interval: Duration::from_millis(1500),
            speaker_on_call: true,
            reassert_on_mismatch: true,
            verify_speaker_changes: true,
        }
    }
}

impl BridgeConfig {
    fn validate(&self) -> Result<(), BridgeError> {
        if self.settle_interval.is_zero() {
            return Err(BridgeError::InvalidConfig(
                "settle_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("outbound call permission denied")]
    PermissionDenied,

    #[error("audio subsystem error: {0}")]
    AudioSubsystem(String),

    #[error("call setup failed: {0}")]
    CallSetup(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no tokio runtime available")]
    NoRuntime,

    #[error("not supported on this platform")]
    NotSupported,

    #[error("bridge control thread is gone")]
    Disconnected,

    #[error("backend error: {0}")]
    Backend(String),
}

/// Resolves once with the outcome of a scheduled settle check.
#[derive(Debug)]
pub struct PendingVerification {
    receiver: oneshot::Receiver<VerificationOutcome>,
}

impl PendingVerification {
    pub(crate) fn new(receiver: oneshot::Receiver<VerificationOutcome>) -> Self {
        Self { receiver }
    }

    pub async fn outcome(self) -> Result<VerificationOutcome, BridgeError> {
        self.receiver.await.map_err(|_| BridgeError::Disconnected)
    }

    /// Blocking form of [`outcome`](Self::outcome). Panics if called from
    /// within an async runtime.
    pub fn outcome_blocking(self) -> Result<VerificationOutcome, BridgeError> {
        self.receiver
            .blocking_recv()
            .map_err(|_| BridgeError::Disconnected)
    }
}

#[derive(Debug)]
pub struct SpeakerUpdate {
    pub routing: RoutingResult,
    /// Present when the read-back disagreed and a settle check was scheduled.
    pub verification: Option<PendingVerification>,
}

#[derive(Debug)]
pub struct EmergencyCall {
    pub request: EmergencyCallRequest,
    pub launch: CallLaunchResult,
    pub verification: PendingVerification,
}

/// Entry point for the host application.
///
/// Audio and call operations are queued to a dedicated control thread and
/// complete in submission order. Dropping the bridge stops that thread and
/// releases any held voice routing before returning.
pub struct EmergencyBridge {
    commands: flume::Sender<Command>,
    control: Option<JoinHandle<()>>,
    wake: WakeCoordinator,
}

impl EmergencyBridge {
    /// Create a bridge on the current platform using the ambient tokio runtime.
    pub fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        let runtime = Handle::try_current().map_err(|_| BridgeError::NoRuntime)?;
        Self::with_platform(config, platform::create_platform()?, runtime)
    }

    /// Create a bridge over explicit platform services. Settle timers are
    /// spawned on `runtime`.
    pub fn with_platform(
        config: BridgeConfig,
        platform: platform::Platform,
        runtime: Handle,
    ) -> Result<Self, BridgeError> {
        config.validate()?;

        let platform::Platform {
            audio,
            calls,
            window,
        } = platform;
        let (commands, control) = control::spawn(config, audio, calls, runtime)?;

        Ok(Self {
            commands,
            control: Some(control),
            wake: WakeCoordinator::new(window),
        })
    }

    /// React to an emergency trigger from the OS. Runs on the caller's
    /// thread and always finishes before any audio or call work is queued.
    pub fn handle_activation(&self, source: ActivationSource) {
        info!(?source, "emergency activation");
        self.wake.force_visible_and_unlocked();
    }

    pub fn force_visible_and_unlocked(&self) {
        self.wake.force_visible_and_unlocked();
    }

    pub async fn set_speakerphone_on(&self, on: bool) -> Result<SpeakerUpdate, BridgeError> {
        self.call(|reply| Command::SetSpeaker { on, reply }).await?
    }

    pub fn set_speakerphone_on_blocking(&self, on: bool) -> Result<SpeakerUpdate, BridgeError> {
        self.call_blocking(|reply| Command::SetSpeaker { on, reply })?
    }

    /// Claim voice routing with the speaker on, dispatch the call and
    /// schedule the settle check. Invalid numbers are rejected before any
    /// side effect.
    pub async fn initiate_emergency_call(
        &self,
        phone_number: &str,
    ) -> Result<EmergencyCall, BridgeError> {
        let number = PhoneNumber::parse(phone_number)?;
        self.call(|reply| Command::InitiateCall { number, reply })
            .await?
    }

    pub fn initiate_emergency_call_blocking(
        &self,
        phone_number: &str,
    ) -> Result<EmergencyCall, BridgeError> {
        let number = PhoneNumber::parse(phone_number)?;
        self.call_blocking(|reply| Command::InitiateCall { number, reply })?
    }

    /// Release held voice routing. Returns false when nothing was held.
    pub async fn release_voice_routing(&self) -> Result<bool, BridgeError> {
        self.call(|reply| Command::Release { reply }).await
    }

    pub fn release_voice_routing_blocking(&self) -> Result<bool, BridgeError> {
        self.call_blocking(|reply| Command::Release { reply })
    }

    pub async fn routing_state(&self) -> Result<AudioRoutingState, BridgeError> {
        self.call(|reply| Command::Snapshot { reply }).await
    }

    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, BridgeError> {
        self.submit(command)?
            .await
            .map_err(|_| BridgeError::Disconnected)
    }

    fn call_blocking<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, BridgeError> {
        self.submit(command)?
            .blocking_recv()
            .map_err(|_| BridgeError::Disconnected)
    }

    fn submit<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<oneshot::Receiver<T>, BridgeError> {
        let (reply, receiver) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| BridgeError::Disconnected)?;
        Ok(receiver)
    }
}

impl Drop for EmergencyBridge {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(control) = self.control.take() {
            if control.join().is_err() {
                error!("control thread panicked during shutdown");
            }
        }
    }
}
