use std::sync::Arc;

use jni::objects::{GlobalRef, JObject, JValue};
use jni::{JNIEnv, JavaVM};
use tracing::debug;

use crate::platform::{AudioMode, AudioService, CallService, Platform, WindowService};
use crate::BridgeError;

// android.os.Build.VERSION_CODES
const API_O: i32 = 26;
const API_O_MR1: i32 = 27;

// android.media.AudioManager
const AUDIOFOCUS_GAIN: i32 = 1;
const AUDIOFOCUS_REQUEST_GRANTED: i32 = 1;
const STREAM_VOICE_CALL: i32 = 0;
const MODE_NORMAL: i32 = 0;
const MODE_IN_CALL: i32 = 2;

// android.media.AudioAttributes
const USAGE_VOICE_COMMUNICATION: i32 = 2;
const CONTENT_TYPE_SPEECH: i32 = 1;

const PERMISSION_GRANTED: i32 = 0;
const CALL_PHONE: &str = "android.permission.CALL_PHONE";
const ACTION_CALL: &str = "android.intent.action.CALL";
const FLAG_ACTIVITY_NEW_TASK: i32 = 0x1000_0000;

// android.view.WindowManager.LayoutParams
const FLAG_KEEP_SCREEN_ON: i32 = 0x0000_0080;
const FLAG_SHOW_WHEN_LOCKED: i32 = 0x0008_0000;
const FLAG_TURN_SCREEN_ON: i32 = 0x0020_0000;
const FLAG_DISMISS_KEYGUARD: i32 = 0x0040_0000;

/// JavaVM plus the host activity, shared by all services.
struct Jvm {
    vm: JavaVM,
    activity: GlobalRef,
    sdk_int: i32,
}

impl Jvm {
    /// Run `f` with an attached env inside a local reference frame.
    /// A pending Java exception is cleared and reported as the error.
    fn with_env<T>(
        &self,
        what: &str,
        f: impl FnOnce(&mut JNIEnv<'_>, &JObject<'static>) -> jni::errors::Result<T>,
    ) -> Result<T, String> {
        let mut env = self
            .vm
            .attach_current_thread()
            .map_err(|e| format!("{what}: failed to attach thread: {e}"))?;

        let activity = self.activity.as_obj();
        let result = env.with_local_frame(16, |env| f(env, activity));

        if env.exception_check().unwrap_or(false) {
            let _ = env.exception_describe();
            let _ = env.exception_clear();
        }
        result.map_err(|e| format!("{what}: {e}"))
    }

    fn system_service(&self, name: &str) -> Result<GlobalRef, String> {
        self.with_env("getSystemService", |env, activity| {
            let name = env.new_string(name)?;
            let service = env
                .call_method(
                    activity,
                    "getSystemService",
                    "(Ljava/lang/String;)Ljava/lang/Object;",
                    &[JValue::Object(&name)],
                )?
                .l()?;
            env.new_global_ref(service)
        })
    }
}

/// Build the Android services from the activity registered in `ndk_context`.
pub fn create_platform() -> Result<Platform, BridgeError> {
    let ctx = ndk_context::android_context();
    let vm = unsafe { JavaVM::from_raw(ctx.vm().cast()) }
        .map_err(|e| BridgeError::Backend(format!("invalid JavaVM: {e}")))?;

    let (activity, sdk_int) = {
        let mut env = vm
            .attach_current_thread()
            .map_err(|e| BridgeError::Backend(format!("failed to attach thread: {e}")))?;
        let activity = unsafe { JObject::from_raw(ctx.context().cast()) };
        let activity = env
            .new_global_ref(activity)
            .map_err(|e| BridgeError::Backend(format!("activity reference: {e}")))?;
        let sdk_int = env
            .get_static_field("android/os/Build$VERSION", "SDK_INT", "I")
            .and_then(|v| v.i())
            .map_err(|e| BridgeError::Backend(format!("SDK_INT: {e}")))?;
        (activity, sdk_int)
    };
    debug!(sdk_int, "android platform attached");

    let jvm = Arc::new(Jvm {
        vm,
        activity,
        sdk_int,
    });
    let manager = jvm
        .system_service("audio")
        .map_err(BridgeError::AudioSubsystem)?;

    Ok(Platform {
        audio: Box::new(AndroidAudio {
            jvm: jvm.clone(),
            manager,
            focus_request: None,
        }),
        calls: Box::new(AndroidCalls { jvm: jvm.clone() }),
        window: Arc::new(AndroidWindow { jvm }),
    })
}

struct AndroidAudio {
    jvm: Arc<Jvm>,
    manager: GlobalRef,
    focus_request: Option<GlobalRef>,
}

impl AudioService for AndroidAudio {
    fn request_focus(&mut self) -> Result<bool, BridgeError> {
        let manager = self.manager.as_obj();

        if self.jvm.sdk_int >= API_O {
            let (request, result) = self
                .jvm
                .with_env("requestAudioFocus", |env, _| {
                    let attributes = env.new_object("android/media/AudioAttributes$Builder", "()V", &[])?;
                    env.call_method(
                        &attributes,
                        "setUsage",
                        "(I)Landroid/media/AudioAttributes$Builder;",
                        &[JValue::Int(USAGE_VOICE_COMMUNICATION)],
                    )?;
                    env.call_method(
                        &attributes,
                        "setContentType",
                        "(I)Landroid/media/AudioAttributes$Builder;",
                        &[JValue::Int(CONTENT_TYPE_SPEECH)],
                    )?;
                    let attributes = env
                        .call_method(&attributes, "build", "()Landroid/media/AudioAttributes;", &[])?
                        .l()?;

                    let builder = env.new_object(
                        "android/media/AudioFocusRequest$Builder",
                        "(I)V",
                        &[JValue::Int(AUDIOFOCUS_GAIN)],
                    )?;
                    env.call_method(
                        &builder,
                        "setAudioAttributes",
                        "(Landroid/media/AudioAttributes;)Landroid/media/AudioFocusRequest$Builder;",
                        &[JValue::Object(&attributes)],
                    )?;
                    let request = env
                        .call_method(&builder, "build", "()Landroid/media/AudioFocusRequest;", &[])?
                        .l()?;

                    let result = env
                        .call_method(
                            manager,
                            "requestAudioFocus",
                            "(Landroid/media/AudioFocusRequest;)I",
                            &[JValue::Object(&request)],
                        )?
                        .i()?;
                    Ok((env.new_global_ref(&request)?, result))
                })
                .map_err(BridgeError::AudioSubsystem)?;

            self.focus_request = Some(request);
            return Ok(result == AUDIOFOCUS_REQUEST_GRANTED);
        }

        let result = self
            .jvm
            .with_env("requestAudioFocus", |env, _| {
                env.call_method(
                    manager,
                    "requestAudioFocus",
                    "(Landroid/media/AudioManager$OnAudioFocusChangeListener;II)I",
                    &[
                        JValue::Object(&JObject::null()),
                        JValue::Int(STREAM_VOICE_CALL),
                        JValue::Int(AUDIOFOCUS_GAIN),
                    ],
                )?
                .i()
            })
            .map_err(BridgeError::AudioSubsystem)?;
        Ok(result == AUDIOFOCUS_REQUEST_GRANTED)
    }

    fn abandon_focus(&mut self) -> Result<(), BridgeError> {
        let manager = self.manager.as_obj();

        if self.jvm.sdk_int >= API_O {
            let Some(request) = self.focus_request.take() else {
                return Ok(());
            };
            return self
                .jvm
                .with_env("abandonAudioFocusRequest", |env, _| {
                    env.call_method(
                        manager,
                        "abandonAudioFocusRequest",
                        "(Landroid/media/AudioFocusRequest;)I",
                        &[JValue::Object(request.as_obj())],
                    )
                    .map(|_| ())
                })
                .map_err(BridgeError::AudioSubsystem);
        }

        self.jvm
            .with_env("abandonAudioFocus", |env, _| {
                env.call_method(
                    manager,
                    "abandonAudioFocus",
                    "(Landroid/media/AudioManager$OnAudioFocusChangeListener;)I",
                    &[JValue::Object(&JObject::null())],
                )
                .map(|_| ())
            })
            .map_err(BridgeError::AudioSubsystem)
    }

    fn set_mode(&mut self, mode: AudioMode) -> Result<(), BridgeError> {
        let manager = self.manager.as_obj();
        let mode = match mode {
            AudioMode::Normal => MODE_NORMAL,
            AudioMode::InCall => MODE_IN_CALL,
        };
        self.jvm
            .with_env("setMode", |env, _| {
                env.call_method(manager, "setMode", "(I)V", &[JValue::Int(mode)])
                    .map(|_| ())
            })
            .map_err(BridgeError::AudioSubsystem)
    }

    fn set_speakerphone_on(&mut self, on: bool) -> Result<(), BridgeError> {
        let manager = self.manager.as_obj();
        self.jvm
            .with_env("setSpeakerphoneOn", |env, _| {
                env.call_method(manager, "setSpeakerphoneOn", "(Z)V", &[JValue::Bool(on.into())])
                    .map(|_| ())
            })
            .map_err(BridgeError::AudioSubsystem)
    }

    fn is_speakerphone_on(&mut self) -> Result<bool, BridgeError> {
        let manager = self.manager.as_obj();
        self.jvm
            .with_env("isSpeakerphoneOn", |env, _| {
                env.call_method(manager, "isSpeakerphoneOn", "()Z", &[])?.z()
            })
            .map_err(BridgeError::AudioSubsystem)
    }
}

struct AndroidCalls {
    jvm: Arc<Jvm>,
}

impl CallService for AndroidCalls {
    fn has_call_permission(&mut self) -> Result<bool, BridgeError> {
        let status = self
            .jvm
            .with_env("checkSelfPermission", |env, activity| {
                let permission = env.new_string(CALL_PHONE)?;
                env.call_method(
                    activity,
                    "checkSelfPermission",
                    "(Ljava/lang/String;)I",
                    &[JValue::Object(&permission)],
                )?
                .i()
            })
            .map_err(BridgeError::CallSetup)?;
        Ok(status == PERMISSION_GRANTED)
    }

    fn dial(&mut self, number: &str) -> Result<(), BridgeError> {
        self.jvm
            .with_env("startActivity", |env, activity| {
                let scheme = env.new_string("tel")?;
                let number = env.new_string(number)?;
                // fromParts encodes '#' instead of treating it as a fragment.
                let uri = env
                    .call_static_method(
                        "android/net/Uri",
                        "fromParts",
                        "(Ljava/lang/String;Ljava/lang/String;Ljava/lang/String;)Landroid/net/Uri;",
                        &[
                            JValue::Object(&scheme),
                            JValue::Object(&number),
                            JValue::Object(&JObject::null()),
                        ],
                    )?
                    .l()?;

                let action = env.new_string(ACTION_CALL)?;
                let intent = env.new_object(
                    "android/content/Intent",
                    "(Ljava/lang/String;Landroid/net/Uri;)V",
                    &[JValue::Object(&action), JValue::Object(&uri)],
                )?;
                env.call_method(
                    &intent,
                    "setFlags",
                    "(I)Landroid/content/Intent;",
                    &[JValue::Int(FLAG_ACTIVITY_NEW_TASK)],
                )?;
                env.call_method(
                    activity,
                    "startActivity",
                    "(Landroid/content/Intent;)V",
                    &[JValue::Object(&intent)],
                )
                .map(|_| ())
            })
            .map_err(BridgeError::CallSetup)
    }
}

/// Window flags added alongside show-when-locked. The screen is kept on for
/// the duration of the call on every API level.
fn show_when_locked_flags(sdk_int: i32) -> i32 {
    if sdk_int >= API_O_MR1 {
        FLAG_KEEP_SCREEN_ON
    } else {
        FLAG_SHOW_WHEN_LOCKED | FLAG_KEEP_SCREEN_ON
    }
}

/// Window flags only take effect from the UI thread.
struct AndroidWindow {
    jvm: Arc<Jvm>,
}

impl AndroidWindow {
    fn add_window_flags(&self, flags: i32) -> Result<(), BridgeError> {
        self.jvm
            .with_env("addFlags", |env, activity| {
                let window = env
                    .call_method(activity, "getWindow", "()Landroid/view/Window;", &[])?
                    .l()?;
                env.call_method(&window, "addFlags", "(I)V", &[JValue::Int(flags)])
                    .map(|_| ())
            })
            .map_err(BridgeError::Backend)
    }

    fn call_activity_flag(&self, method: &str) -> Result<(), BridgeError> {
        self.jvm
            .with_env(method, |env, activity| {
                env.call_method(activity, method, "(Z)V", &[JValue::Bool(1)])
                    .map(|_| ())
            })
            .map_err(BridgeError::Backend)
    }
}

impl WindowService for AndroidWindow {
    fn show_when_locked(&self) -> Result<(), BridgeError> {
        if self.jvm.sdk_int >= API_O_MR1 {
            self.call_activity_flag("setShowWhenLocked")?;
        }
        self.add_window_flags(show_when_locked_flags(self.jvm.sdk_int))
    }

    fn turn_screen_on(&self) -> Result<(), BridgeError> {
        if self.jvm.sdk_int >= API_O_MR1 {
            self.call_activity_flag("setTurnScreenOn")
        } else {
            self.add_window_flags(FLAG_TURN_SCREEN_ON)
        }
    }

    /// On a secure keyguard `requestDismissKeyguard` brings up the credential
    /// prompt. That is intended: the activity is already shown over the lock
    /// screen, so the call proceeds whether or not the user unlocks.
    fn dismiss_keyguard(&self) -> Result<(), BridgeError> {
        if self.jvm.sdk_int < API_O_MR1 {
            return self.add_window_flags(FLAG_DISMISS_KEYGUARD);
        }

        let keyguard = self.jvm.system_service("keyguard").map_err(BridgeError::Backend)?;
        self.jvm
            .with_env("requestDismissKeyguard", |env, activity| {
                env.call_method(
                    keyguard.as_obj(),
                    "requestDismissKeyguard",
                    "(Landroid/app/Activity;Landroid/app/KeyguardManager$KeyguardDismissCallback;)V",
                    &[JValue::Object(activity), JValue::Object(&JObject::null())],
                )
                .map(|_| ())
            })
            .map_err(BridgeError::Backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screen_kept_on_at_every_api_level() {
        for sdk_int in [21, 26, API_O_MR1, 34] {
            assert_ne!(show_when_locked_flags(sdk_int) & FLAG_KEEP_SCREEN_ON, 0);
        }
        assert_ne!(show_when_locked_flags(26) & FLAG_SHOW_WHEN_LOCKED, 0);
        assert_eq!(show_when_locked_flags(API_O_MR1) & FLAG_SHOW_WHEN_LOCKED, 0);
    }
}
