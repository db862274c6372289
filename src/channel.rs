//! Method-channel surface for the cross-platform UI layer.
//!
//! Calls arrive as `(channel, method, args)` with JSON arguments and are
//! answered with a success value, an error with a stable code, or
//! `notImplemented`. Error codes are for branching; messages are
//! diagnostics only.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{BridgeError, EmergencyBridge};

pub const AUDIO_CHANNEL: &str = "smart_cane/audio";
pub const CALL_CHANNEL: &str = "smart_cane/call";

#[derive(Debug, Clone, Deserialize)]
pub struct MethodCall {
    pub channel: String,
    pub method: String,
    #[serde(default)]
    pub args: Value,
}

impl MethodCall {
    pub fn new(channel: &str, method: &str, args: Value) -> Self {
        Self {
            channel: channel.to_string(),
            method: method.to_string(),
            args,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, BridgeError> {
        serde_json::from_str(json)
            .map_err(|e| BridgeError::InvalidArgument(format!("malformed method call: {e}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidArgument,
    PermissionError,
    SpeakerphoneError,
    CallSetupError,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum MethodReply {
    Success { value: Value },
    Error { code: ErrorCode, message: String },
    NotImplemented,
}

impl MethodReply {
    fn error(code: ErrorCode, err: &BridgeError) -> Self {
        Self::Error {
            code,
            message: err.to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"status":"error","code":"CALL_SETUP_ERROR","message":"reply encoding failed: {e}"}}"#)
        })
    }
}

pub async fn handle_method_call(bridge: &EmergencyBridge, call: &MethodCall) -> MethodReply {
    debug!(channel = %call.channel, method = %call.method, "method call");

    match (call.channel.as_str(), call.method.as_str()) {
        (AUDIO_CHANNEL, "setSpeakerphoneOn") => set_speakerphone_on(bridge, &call.args).await,
        (AUDIO_CHANNEL, "releaseVoiceRouting") => match bridge.release_voice_routing().await {
            Ok(released) => MethodReply::Success {
                value: json!({ "released": released }),
            },
            Err(e) => MethodReply::error(ErrorCode::SpeakerphoneError, &e),
        },
        (CALL_CHANNEL, "initiateEmergencyCallAndSpeaker") => {
            initiate_emergency_call(bridge, &call.args).await
        }
        _ => MethodReply::NotImplemented,
    }
}

async fn set_speakerphone_on(bridge: &EmergencyBridge, args: &Value) -> MethodReply {
    let Some(on) = args.get("on").and_then(Value::as_bool) else {
        let err = BridgeError::InvalidArgument("argument 'on' is null".to_string());
        return MethodReply::error(ErrorCode::InvalidArgument, &err);
    };

    match bridge.set_speakerphone_on(on).await {
        Ok(update) => MethodReply::Success {
            value: json!({ "success": update.routing.took_effect() }),
        },
        Err(e) => {
            warn!(error = %e, "setSpeakerphoneOn failed");
            MethodReply::error(ErrorCode::SpeakerphoneError, &e)
        }
    }
}

/// Replies after the settle check with the final speaker state.
async fn initiate_emergency_call(bridge: &EmergencyBridge, args: &Value) -> MethodReply {
    let Some(number) = args.get("phoneNumber").and_then(Value::as_str) else {
        let err = BridgeError::InvalidArgument("phone number is null".to_string());
        return MethodReply::error(ErrorCode::InvalidArgument, &err);
    };

    let call = match bridge.initiate_emergency_call(number).await {
        Ok(call) => call,
        Err(e @ BridgeError::InvalidArgument(_)) => {
            return MethodReply::error(ErrorCode::InvalidArgument, &e)
        }
        Err(e @ BridgeError::PermissionDenied) => {
            return MethodReply::error(ErrorCode::PermissionError, &e)
        }
        Err(e) => {
            warn!(error = %e, "initiateEmergencyCallAndSpeaker failed");
            return MethodReply::error(ErrorCode::CallSetupError, &e);
        }
    };

    let speaker_active = match call.verification.outcome().await {
        Ok(outcome) => outcome.actual,
        Err(e) => {
            // The call is already out; report what was true at dispatch.
            warn!(error = %e, "verification did not complete");
            call.launch.speaker_active_at_dispatch
        }
    };

    MethodReply::Success {
        value: json!({ "speakerActive": speaker_active }),
    }
}
