//! Voicemeeter Remote API binding.
//!
//! The remote DLL is loaded at connect time. It has no push channel, so a
//! poller asks `VBVMR_IsParametersDirty` on an interval and turns a dirty
//! flag into a notification.

use std::{
    ffi::{c_char, c_long, CStr, CString},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use device_session::{DeviceError, DeviceLink, DeviceNotifier};
use libloading::Library;
use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::controller::{MixerConnector, MixerLink, MixerNotification};

pub const DEFAULT_LIBRARY_PATH: &str =
    r"C:\Program Files (x86)\VB\Voicemeeter\VoicemeeterRemote64.dll";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn strip_gain_parameter(strip_index: u32) -> String {
    format!("Strip[{strip_index}].Gain")
}

/// Raw remote calls, status codes as the DLL returns them.
pub trait RemoteApi: Send + Sync + 'static {
    fn login(&self) -> i32;
    fn logout(&self) -> i32;
    fn is_parameters_dirty(&self) -> i32;
    fn get_parameter_float(&self, name: &CStr) -> Result<f32, i32>;
    fn set_parameter_float(&self, name: &CStr, value: f32) -> i32;
}

type StatusFn = unsafe extern "system" fn() -> c_long;
type GetFloatFn = unsafe extern "system" fn(*const c_char, *mut f32) -> c_long;
type SetFloatFn = unsafe extern "system" fn(*const c_char, f32) -> c_long;

struct RemoteLibrary {
    login: StatusFn,
    logout: StatusFn,
    is_parameters_dirty: StatusFn,
    get_parameter_float: GetFloatFn,
    set_parameter_float: SetFloatFn,
    // Keeps the function pointers above valid.
    _library: Library,
}

impl RemoteLibrary {
    fn load(path: &Path) -> Result<Self, DeviceError> {
        // SAFETY: the remote DLL runs no initialisation that depends on
        // caller state.
        let library = unsafe { Library::new(path) }.map_err(|err| {
            DeviceError::Unreachable(format!("failed to load {}: {err}", path.display()))
        })?;

        // SAFETY: signatures follow VoicemeeterRemote.h; the pointers are
        // only called while `_library` is alive.
        unsafe {
            let login = *library.get::<StatusFn>(b"VBVMR_Login\0").map_err(missing)?;
            let logout = *library.get::<StatusFn>(b"VBVMR_Logout\0").map_err(missing)?;
            let is_parameters_dirty = *library
                .get::<StatusFn>(b"VBVMR_IsParametersDirty\0")
                .map_err(missing)?;
            let get_parameter_float = *library
                .get::<GetFloatFn>(b"VBVMR_GetParameterFloat\0")
                .map_err(missing)?;
            let set_parameter_float = *library
                .get::<SetFloatFn>(b"VBVMR_SetParameterFloat\0")
                .map_err(missing)?;
            Ok(Self {
                login,
                logout,
                is_parameters_dirty,
                get_parameter_float,
                set_parameter_float,
                _library: library,
            })
        }
    }
}

fn missing(err: libloading::Error) -> DeviceError {
    DeviceError::Binding(format!("missing remote API symbol: {err}"))
}

impl RemoteApi for RemoteLibrary {
    fn login(&self) -> i32 {
        unsafe { (self.login)() as i32 }
    }

    fn logout(&self) -> i32 {
        unsafe { (self.logout)() as i32 }
    }

    fn is_parameters_dirty(&self) -> i32 {
        unsafe { (self.is_parameters_dirty)() as i32 }
    }

    fn get_parameter_float(&self, name: &CStr) -> Result<f32, i32> {
        let mut value = 0.0_f32;
        let code = unsafe { (self.get_parameter_float)(name.as_ptr(), &mut value) } as i32;
        if code == 0 {
            Ok(value)
        } else {
            Err(code)
        }
    }

    fn set_parameter_float(&self, name: &CStr, value: f32) -> i32 {
        unsafe { (self.set_parameter_float)(name.as_ptr(), value) as i32 }
    }
}

pub struct VoicemeeterConnector {
    library_path: PathBuf,
    poll_interval: Duration,
}

impl VoicemeeterConnector {
    pub fn new(library_path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            library_path: library_path.into(),
            poll_interval,
        }
    }

    pub fn library_path(&self) -> &Path {
        &self.library_path
    }
}

impl Default for VoicemeeterConnector {
    fn default() -> Self {
        Self::new(DEFAULT_LIBRARY_PATH, DEFAULT_POLL_INTERVAL)
    }
}

#[async_trait]
impl MixerConnector for VoicemeeterConnector {
    async fn open(
        &self,
        notifier: DeviceNotifier<MixerNotification>,
    ) -> Result<Arc<dyn MixerLink>, DeviceError> {
        let api = RemoteLibrary::load(&self.library_path)?;
        info!(path = %self.library_path.display(), "loaded voicemeeter remote library");
        let link = VoicemeeterLink::start(Arc::new(api), self.poll_interval, notifier)?;
        Ok(link)
    }
}

pub struct VoicemeeterLink {
    api: Arc<dyn RemoteApi>,
    logged_out: AtomicBool,
    poller: JoinHandle<()>,
}

impl VoicemeeterLink {
    /// Logs in and starts the dirty-flag poller. Login code 1 means the
    /// Voicemeeter application is not running yet; the session is still
    /// usable once it starts.
    pub fn start(
        api: Arc<dyn RemoteApi>,
        poll_interval: Duration,
        notifier: DeviceNotifier<MixerNotification>,
    ) -> Result<Arc<Self>, DeviceError> {
        match api.login() {
            0 => info!("logged in to voicemeeter"),
            1 => info!("logged in to voicemeeter; application not running yet"),
            code => {
                return Err(DeviceError::Unreachable(format!(
                    "VBVMR_Login returned {code}"
                )))
            }
        }
        let poller = tokio::spawn(poll_loop(Arc::clone(&api), poll_interval, notifier));
        Ok(Arc::new(Self {
            api,
            logged_out: AtomicBool::new(false),
            poller,
        }))
    }

    fn shutdown(&self) {
        self.poller.abort();
        if !self.logged_out.swap(true, Ordering::SeqCst) {
            let code = self.api.logout();
            debug!(code, "logged out of voicemeeter");
        }
    }
}

impl Drop for VoicemeeterLink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[async_trait]
impl DeviceLink for VoicemeeterLink {
    async fn close(&self) {
        self.shutdown();
    }
}

#[async_trait]
impl MixerLink for VoicemeeterLink {
    async fn set_strip_gain(&self, strip_index: u32, gain: f32) -> Result<(), DeviceError> {
        let name = parameter_name(strip_index)?;
        match self.api.set_parameter_float(&name, gain) {
            0 => Ok(()),
            code => Err(parameter_error(code)),
        }
    }

    async fn strip_gain(&self, strip_index: u32) -> Result<f32, DeviceError> {
        let name = parameter_name(strip_index)?;
        self.api
            .get_parameter_float(&name)
            .map_err(parameter_error)
    }
}

fn parameter_name(strip_index: u32) -> Result<CString, DeviceError> {
    CString::new(strip_gain_parameter(strip_index))
        .map_err(|err| DeviceError::Binding(err.to_string()))
}

fn parameter_error(code: i32) -> DeviceError {
    let comment = match code {
        -1 => "remote API error",
        -2 => "no voicemeeter server",
        -3 => "unknown parameter",
        -5 => "structure mismatch",
        _ => "unexpected status",
    };
    DeviceError::RequestFailed {
        code: i64::from(code),
        comment: comment.to_string(),
    }
}

async fn poll_loop(
    api: Arc<dyn RemoteApi>,
    poll_interval: Duration,
    notifier: DeviceNotifier<MixerNotification>,
) {
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match api.is_parameters_dirty() {
            0 => {}
            1 => notifier.notify(MixerNotification::ParametersChanged),
            code if code < 0 => {
                warn!(code, "voicemeeter server went away");
                notifier.closed();
                return;
            }
            code => debug!(code, "unexpected dirty flag"),
        }
    }
}

#[cfg(test)]
#[path = "tests/voicemeeter_tests.rs"]
mod tests;
