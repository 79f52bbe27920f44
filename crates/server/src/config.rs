use std::{
    fs, io,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context};
use relay::GainBroadcastPolicy;
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bind_addr: String,
    pub obs_url: String,
    pub obs_password: Option<String>,
    pub mixer_enabled: bool,
    pub mixer_library_path: PathBuf,
    pub mixer_poll_interval_ms: u64,
    pub gain_broadcast: GainBroadcastPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".into(),
            obs_url: "ws://127.0.0.1:4455".into(),
            obs_password: None,
            mixer_enabled: cfg!(windows),
            mixer_library_path: mixer::voicemeeter::DEFAULT_LIBRARY_PATH.into(),
            mixer_poll_interval_ms: mixer::voicemeeter::DEFAULT_POLL_INTERVAL.as_millis() as u64,
            gain_broadcast: GainBroadcastPolicy::default(),
        }
    }
}

impl Settings {
    pub fn mixer_poll_interval(&self) -> Duration {
        Duration::from_millis(self.mixer_poll_interval_ms)
    }
}

/// Keys accepted in the TOML file; anything absent keeps its default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    bind_addr: Option<String>,
    obs_url: Option<String>,
    obs_password: Option<String>,
    mixer_enabled: Option<bool>,
    mixer_library_path: Option<PathBuf>,
    mixer_poll_interval_ms: Option<u64>,
    gain_broadcast: Option<GainBroadcastPolicy>,
}

/// Defaults, then the TOML file at `path` if it exists, then the process
/// environment.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    match fs::read_to_string(path) {
        Ok(raw) => {
            apply_file(&mut settings, &raw)
                .with_context(|| format!("invalid config file '{}'", path.display()))?;
            info!(path = %path.display(), "loaded config file");
        }
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no config file; using defaults");
        }
        Err(error) => {
            return Err(error)
                .with_context(|| format!("failed to read config file '{}'", path.display()))
        }
    }

    apply_env(&mut settings, |key| std::env::var(key).ok());
    validate(&settings)?;
    Ok(settings)
}

fn apply_file(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file: FileSettings = toml::from_str(raw)?;
    if let Some(v) = file.bind_addr {
        settings.bind_addr = v;
    }
    if let Some(v) = file.obs_url {
        settings.obs_url = v;
    }
    if let Some(v) = file.obs_password {
        settings.obs_password = Some(v);
    }
    if let Some(v) = file.mixer_enabled {
        settings.mixer_enabled = v;
    }
    if let Some(v) = file.mixer_library_path {
        settings.mixer_library_path = v;
    }
    if let Some(v) = file.mixer_poll_interval_ms {
        settings.mixer_poll_interval_ms = v;
    }
    if let Some(v) = file.gain_broadcast {
        settings.gain_broadcast = v;
    }
    Ok(())
}

/// `APP__*` keys win over the short aliases.
fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(port) = var("BACKEND_PORT") {
        match port.parse::<u16>() {
            Ok(port) => settings.bind_addr = with_port(&settings.bind_addr, port),
            Err(_) => warn!(%port, "ignoring invalid BACKEND_PORT"),
        }
    }
    if let Some(v) = var("APP__BIND_ADDR") {
        settings.bind_addr = v;
    }

    if let Some(v) = var("OBS_WEBSOCKET_URL") {
        settings.obs_url = v;
    }
    if let Some(v) = var("APP__OBS_URL") {
        settings.obs_url = v;
    }

    if let Some(v) = var("OBS_WEBSOCKET_PASSWORD") {
        settings.obs_password = Some(v);
    }
    if let Some(v) = var("APP__OBS_PASSWORD") {
        settings.obs_password = Some(v);
    }

    if let Some(v) = var("APP__MIXER_ENABLED") {
        match v.parse::<bool>() {
            Ok(enabled) => settings.mixer_enabled = enabled,
            Err(_) => warn!(value = %v, "ignoring invalid APP__MIXER_ENABLED"),
        }
    }
    if let Some(v) = var("APP__MIXER_LIBRARY_PATH") {
        settings.mixer_library_path = v.into();
    }
    if let Some(v) = var("APP__MIXER_POLL_INTERVAL_MS") {
        match v.parse::<u64>() {
            Ok(ms) => settings.mixer_poll_interval_ms = ms,
            Err(_) => warn!(value = %v, "ignoring invalid APP__MIXER_POLL_INTERVAL_MS"),
        }
    }
    if let Some(v) = var("APP__GAIN_BROADCAST") {
        match v.as_str() {
            "optimistic" => settings.gain_broadcast = GainBroadcastPolicy::Optimistic,
            "confirmed" => settings.gain_broadcast = GainBroadcastPolicy::Confirmed,
            _ => warn!(value = %v, "ignoring invalid APP__GAIN_BROADCAST"),
        }
    }
}

fn with_port(bind_addr: &str, port: u16) -> String {
    match bind_addr.parse::<SocketAddr>() {
        Ok(mut addr) => {
            addr.set_port(port);
            addr.to_string()
        }
        Err(_) => format!("0.0.0.0:{port}"),
    }
}

fn validate(settings: &Settings) -> anyhow::Result<()> {
    settings
        .bind_addr
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid bind_addr '{}'", settings.bind_addr))?;

    let obs_url = Url::parse(&settings.obs_url)
        .with_context(|| format!("invalid obs_url '{}'", settings.obs_url))?;
    if !matches!(obs_url.scheme(), "ws" | "wss") {
        bail!("obs_url must use ws:// or wss://, got '{}'", settings.obs_url);
    }

    if settings.mixer_poll_interval_ms == 0 {
        bail!("mixer_poll_interval_ms must be greater than zero");
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
