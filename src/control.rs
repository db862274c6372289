//! The foreground control thread.
//!
//! One named OS thread owns the audio controller and the call launcher and
//! runs every routing mutation, including the supervisor's corrective write,
//! in the order commands arrive. Settle timers live on the tokio runtime and
//! only hop back here to do their work.

use std::thread::JoinHandle;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::audio::{AudioRoutingState, DeviceAudioController};
use crate::call::{CallLauncher, EmergencyCallRequest, PhoneNumber};
use crate::platform::{AudioService, CallService};
use crate::supervisor::{VerificationOutcome, VerificationSupervisor};
use crate::{BridgeConfig, BridgeError, EmergencyCall, PendingVerification, SpeakerUpdate};

const SPEAKER_OWNER: &str = "speakerphone";

pub(crate) enum Command {
    SetSpeaker {
        on: bool,
        reply: oneshot::Sender<Result<SpeakerUpdate, BridgeError>>,
    },
    InitiateCall {
        number: PhoneNumber,
        reply: oneshot::Sender<Result<EmergencyCall, BridgeError>>,
    },
    Release {
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<AudioRoutingState>,
    },
    Settle {
        supervisor: VerificationSupervisor,
        reply: oneshot::Sender<VerificationOutcome>,
    },
    Shutdown,
}

struct ControlLoop {
    audio: DeviceAudioController,
    launcher: CallLauncher,
    config: BridgeConfig,
    runtime: Handle,
    commands: flume::Sender<Command>,
    next_request: u64,
}

/// Start the control thread. It runs until it receives `Shutdown` and
/// releases voice routing on the way out.
pub(crate) fn spawn(
    config: BridgeConfig,
    audio: Box<dyn AudioService>,
    calls: Box<dyn CallService>,
    runtime: Handle,
) -> Result<(flume::Sender<Command>, JoinHandle<()>), BridgeError> {
    let (tx, rx) = flume::unbounded::<Command>();
    let commands = tx.clone();

    let handle = std::thread::Builder::new()
        .name("cane-control".to_string())
        .spawn(move || ControlLoop::new(config, audio, calls, runtime, commands).run(rx))
        .map_err(|e| BridgeError::Backend(format!("failed to spawn control thread: {e:?}")))?;

    Ok((tx, handle))
}

impl ControlLoop {
    fn new(
        config: BridgeConfig,
        audio: Box<dyn AudioService>,
        calls: Box<dyn CallService>,
        runtime: Handle,
        commands: flume::Sender<Command>,
    ) -> Self {
        Self {
            audio: DeviceAudioController::new(audio),
            launcher: CallLauncher::new(calls),
            config,
            runtime,
            commands,
            next_request: 0,
        }
    }

    fn run(&mut self, rx: flume::Receiver<Command>) {
        debug!("control thread started");

        while let Ok(command) = rx.recv() {
            if !self.handle(command) {
                break;
            }
        }

        self.audio.release_voice_routing();
        info!("control thread stopped");
    }

    /// Returns false once the loop should stop.
    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::SetSpeaker { on, reply } => {
                let _ = reply.send(self.set_speaker(on));
            }
            Command::InitiateCall { number, reply } => {
                let _ = reply.send(self.initiate_call(number));
            }
            Command::Release { reply } => {
                let _ = reply.send(self.audio.release_voice_routing());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.audio.state());
            }
            Command::Settle {
                mut supervisor,
                reply,
            } => {
                if let Some(outcome) = supervisor.settle(&mut self.audio) {
                    if reply.send(outcome).is_err() {
                        debug!(owner = supervisor.owner(), "verification outcome dropped by caller");
                    }
                }
            }
            Command::Shutdown => return false,
        }
        true
    }

    fn set_speaker(&mut self, on: bool) -> Result<SpeakerUpdate, BridgeError> {
        let routing = self.audio.acquire_voice_routing(on, SPEAKER_OWNER)?;

        let verification = if !routing.took_effect() && self.config.verify_speaker_changes {
            let supervisor = VerificationSupervisor::new(
                SPEAKER_OWNER,
                Some(routing.claim),
                on,
                self.config.reassert_on_mismatch,
            );
            Some(self.schedule(supervisor))
        } else {
            None
        };

        Ok(SpeakerUpdate {
            routing,
            verification,
        })
    }

    fn initiate_call(&mut self, number: PhoneNumber) -> Result<EmergencyCall, BridgeError> {
        self.next_request += 1;
        let request = EmergencyCallRequest::new(self.next_request, number);
        let expected = self.config.speaker_on_call;

        let launch = self
            .launcher
            .initiate_emergency_call(&mut self.audio, &request, expected)?;

        let supervisor = VerificationSupervisor::new(
            request.owner(),
            self.audio.active_claim(),
            expected,
            self.config.reassert_on_mismatch,
        );
        let verification = self.schedule(supervisor);

        Ok(EmergencyCall {
            request,
            launch,
            verification,
        })
    }

    fn schedule(&self, supervisor: VerificationSupervisor) -> PendingVerification {
        let (reply, outcome) = oneshot::channel();
        let commands = self.commands.clone();
        let interval = self.config.settle_interval;

        debug!(owner = supervisor.owner(), ?interval, "verification scheduled");
        self.runtime.spawn(async move {
            tokio::time::sleep(interval).await;
            if commands
                .send_async(Command::Settle { supervisor, reply })
                .await
                .is_err()
            {
                debug!("control thread gone before settle");
            }
        });

        PendingVerification::new(outcome)
    }
}
