#[cfg(target_os = "android")]
mod android;

pub mod simulated;

use std::sync::Arc;

use crate::BridgeError;

/// Process-wide audio mode as reported to the OS audio service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AudioMode {
    #[default]
    Normal,
    InCall,
}

/// OS audio service: focus, mode and speaker routing.
/// Owned by the control thread; every call happens there.
pub trait AudioService: Send {
    /// Request sustained (non-transient) audio focus on the voice-call stream.
    /// Returns whether the OS granted it.
    fn request_focus(&mut self) -> Result<bool, BridgeError>;

    /// Abandon the focus obtained by the last `request_focus`.
    fn abandon_focus(&mut self) -> Result<(), BridgeError>;

    fn set_mode(&mut self, mode: AudioMode) -> Result<(), BridgeError>;

    fn set_speakerphone_on(&mut self, on: bool) -> Result<(), BridgeError>;

    /// Speaker state as currently reported by the hardware.
    fn is_speakerphone_on(&mut self) -> Result<bool, BridgeError>;
}

/// Outbound calls through the OS dialer.
pub trait CallService: Send {
    /// Whether the outbound-call permission is currently granted.
    fn has_call_permission(&mut self) -> Result<bool, BridgeError>;

    /// Hand the number to the dialer. Returns once the intent is dispatched.
    fn dial(&mut self, number: &str) -> Result<(), BridgeError>;
}

/// Window and power-manager hints. Called from whichever thread surfaces
/// the emergency screen, so implementations must be shareable.
pub trait WindowService: Send + Sync {
    fn show_when_locked(&self) -> Result<(), BridgeError>;

    fn turn_screen_on(&self) -> Result<(), BridgeError>;

    /// Ask the OS to dismiss the keyguard. Only succeeds non-interactively
    /// on non-secure lock configurations.
    fn dismiss_keyguard(&self) -> Result<(), BridgeError>;
}

/// The set of OS services the bridge runs against.
pub struct Platform {
    pub audio: Box<dyn AudioService>,
    pub calls: Box<dyn CallService>,
    pub window: Arc<dyn WindowService>,
}

/// Create the platform backend for the current target.
/// On Android the process-wide `ndk_context` must already be initialized
/// with the host activity.
pub fn create_platform() -> Result<Platform, BridgeError> {
    #[cfg(target_os = "android")]
    {
        android::create_platform()
    }

    #[cfg(not(target_os = "android"))]
    {
        Err(BridgeError::NotSupported)
    }
}
