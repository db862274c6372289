//! JNI bindings for the smart-cane host activity.
//!
//! Kotlin side (`com.smartcane.bridge.NativeBridge`):
//!
//! ```kotlin
//! external fun nativeInit(activity: Activity): Int
//! external fun nativeOnActivation(source: Int)
//! external fun nativeHandleMethodCall(callJson: String, reply: NativeReply)
//! external fun nativeDestroy()
//! ```
//!
//! `NativeReply.onReply(json: String)` is invoked from a background thread;
//! the host posts it to the main looper before completing the channel result.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cane_bridge::channel::{handle_method_call, ErrorCode, MethodCall, MethodReply};
use cane_bridge::{platform, ActivationSource, BridgeConfig, EmergencyBridge};
use jni::objects::{GlobalRef, JClass, JObject, JString, JValue};
use jni::sys::jint;
use jni::{JNIEnv, JavaVM};
use log::{error, info, warn};
use tokio::sync::oneshot;

#[no_mangle]
pub extern "system" fn JNI_OnLoad(
    _vm: jni::JavaVM,
    _reserved: *mut std::ffi::c_void,
) -> jni::sys::jint {
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(log::LevelFilter::Debug)
            .with_tag("CaneBridge"),
    );
    info!("cane-bridge native library loaded");
    jni::sys::JNI_VERSION_1_6
}

struct NativeState {
    bridge: Arc<EmergencyBridge>,
    runtime: tokio::runtime::Handle,
    vm: Arc<JavaVM>,
    // Keeps the activity alive for ndk_context
    _activity: GlobalRef,
    // Sending on this channel stops the runtime
    shutdown_tx: Option<oneshot::Sender<()>>,
}

static STATE: Mutex<Option<NativeState>> = Mutex::new(None);

fn state() -> MutexGuard<'static, Option<NativeState>> {
    STATE.lock().unwrap_or_else(PoisonError::into_inner)
}

#[no_mangle]
pub extern "system" fn Java_com_smartcane_bridge_NativeBridge_nativeInit(
    env: JNIEnv,
    _class: JClass,
    activity: JObject,
) -> jint {
    let mut guard = state();
    if guard.is_some() {
        info!("nativeInit called again, keeping existing bridge");
        return 0;
    }

    let vm = match env.get_java_vm() {
        Ok(vm) => vm,
        Err(e) => {
            error!("Failed to get JavaVM: {:?}", e);
            return -1;
        }
    };
    let activity = match env.new_global_ref(activity) {
        Ok(a) => a,
        Err(e) => {
            error!("Failed to reference activity: {:?}", e);
            return -1;
        }
    };

    // SAFETY: both pointers stay valid until nativeDestroy releases the context.
    unsafe {
        ndk_context::initialize_android_context(
            vm.get_java_vm_pointer().cast(),
            activity.as_obj().as_raw().cast(),
        );
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {:?}", e);
            unsafe { ndk_context::release_android_context() };
            return -2;
        }
    };
    let rt_handle = runtime.handle().clone();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let spawned = std::thread::Builder::new()
        .name("tokio-runtime".to_string())
        .spawn(move || {
            runtime.block_on(async {
                let _ = shutdown_rx.await;
            });
            info!("Runtime background thread stopping");
        });
    if let Err(e) = spawned {
        error!("Failed to spawn runtime thread: {:?}", e);
        unsafe { ndk_context::release_android_context() };
        return -2;
    }

    let bridge = match platform::create_platform().and_then(|platform| {
        EmergencyBridge::with_platform(BridgeConfig::default(), platform, rt_handle.clone())
    }) {
        Ok(b) => b,
        Err(e) => {
            error!("Failed to create bridge: {:?}", e);
            let _ = shutdown_tx.send(());
            unsafe { ndk_context::release_android_context() };
            return -3;
        }
    };

    *guard = Some(NativeState {
        bridge: Arc::new(bridge),
        runtime: rt_handle,
        vm: Arc::new(vm),
        _activity: activity,
        shutdown_tx: Some(shutdown_tx),
    });
    info!("cane-bridge initialized");
    0
}

/// Called from the UI thread on launch, intent redelivery and resume.
#[no_mangle]
pub extern "system" fn Java_com_smartcane_bridge_NativeBridge_nativeOnActivation(
    _env: JNIEnv,
    _class: JClass,
    source: jint,
) {
    let source = match source {
        1 => ActivationSource::Redelivery,
        2 => ActivationSource::Foreground,
        _ => ActivationSource::Launch,
    };

    let bridge = match state().as_ref() {
        Some(s) => s.bridge.clone(),
        None => {
            warn!("activation before nativeInit");
            return;
        }
    };
    bridge.handle_activation(source);
}

/// Every call is answered exactly once through `reply.onReply`. Failures
/// before the call reaches the bridge are answered synchronously.
#[no_mangle]
pub extern "system" fn Java_com_smartcane_bridge_NativeBridge_nativeHandleMethodCall<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    call_json: JString<'local>,
    reply: JObject<'local>,
) {
    let call_json: String = match env.get_string(&call_json) {
        Ok(s) => s.into(),
        Err(e) => {
            error!("Failed to read method call: {:?}", e);
            let _ = env.exception_clear();
            let json = error_reply(ErrorCode::InvalidArgument, format!("unreadable method call: {e}"));
            invoke_reply(&mut env, &reply, &json);
            return;
        }
    };

    let (bridge, runtime, vm) = match state().as_ref() {
        Some(s) => (s.bridge.clone(), s.runtime.clone(), s.vm.clone()),
        None => {
            warn!("method call before nativeInit");
            let json = error_reply(ErrorCode::CallSetupError, "bridge not initialized".to_string());
            invoke_reply(&mut env, &reply, &json);
            return;
        }
    };

    let reply_ref = match env.new_global_ref(&reply) {
        Ok(r) => r,
        Err(e) => {
            error!("Failed to reference reply callback: {:?}", e);
            let _ = env.exception_clear();
            let json = error_reply(ErrorCode::CallSetupError, format!("reply callback unavailable: {e}"));
            invoke_reply(&mut env, &reply, &json);
            return;
        }
    };

    runtime.spawn(async move {
        let reply_json = match MethodCall::from_json(&call_json) {
            Ok(call) => handle_method_call(&bridge, &call).await.to_json(),
            Err(e) => error_reply(ErrorCode::InvalidArgument, e.to_string()),
        };
        deliver_reply(&vm, &reply_ref, &reply_json);
    });
}

fn error_reply(code: ErrorCode, message: String) -> String {
    MethodReply::Error { code, message }.to_json()
}

fn deliver_reply(vm: &JavaVM, reply: &GlobalRef, json: &str) {
    let mut env = match vm.attach_current_thread() {
        Ok(env) => env,
        Err(e) => {
            error!("Failed to attach for reply: {:?}", e);
            return;
        }
    };
    invoke_reply(&mut env, reply.as_obj(), json);
}

fn invoke_reply(env: &mut JNIEnv, reply: &JObject, json: &str) {
    let result = env.new_string(json).and_then(|json| {
        env.call_method(
            reply,
            "onReply",
            "(Ljava/lang/String;)V",
            &[JValue::Object(&json)],
        )
    });
    if let Err(e) = result {
        error!("Failed to deliver reply: {:?}", e);
        let _ = env.exception_clear();
    }
}

/// Called from `onDestroy`. Releases voice routing before returning.
#[no_mangle]
pub extern "system" fn Java_com_smartcane_bridge_NativeBridge_nativeDestroy(
    _env: JNIEnv,
    _class: JClass,
) {
    let Some(mut native) = state().take() else {
        return;
    };

    match native.bridge.release_voice_routing_blocking() {
        Ok(released) => info!("voice routing released on destroy: {}", released),
        Err(e) => warn!("release on destroy failed: {:?}", e),
    }
    drop(native.bridge);
    if let Some(tx) = native.shutdown_tx.take() {
        let _ = tx.send(());
    }
    unsafe { ndk_context::release_android_context() };
    info!("cane-bridge destroyed");
}
