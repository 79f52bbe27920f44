use super::*;

use std::{
    collections::HashMap,
    env,
    time::{SystemTime, UNIX_EPOCH},
};

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

fn temp_path(name: &str) -> PathBuf {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    env::temp_dir().join(format!("remocon_{name}_{suffix}.toml"))
}

#[test]
fn defaults_point_at_local_obs() {
    let settings = Settings::default();
    assert_eq!(settings.obs_url, "ws://127.0.0.1:4455");
    assert_eq!(settings.bind_addr, "0.0.0.0:3000");
    assert_eq!(settings.mixer_poll_interval(), Duration::from_millis(100));
    assert_eq!(settings.gain_broadcast, GainBroadcastPolicy::Optimistic);
    validate(&settings).expect("defaults are valid");
}

#[test]
fn file_values_override_defaults() {
    let mut settings = Settings::default();
    apply_file(
        &mut settings,
        r#"
            bind_addr = "127.0.0.1:3001"
            obs_url = "ws://studio.local:4455"
            obs_password = "hunter2"
            mixer_enabled = false
            mixer_poll_interval_ms = 250
            gain_broadcast = "confirmed"
        "#,
    )
    .expect("parse");

    assert_eq!(settings.bind_addr, "127.0.0.1:3001");
    assert_eq!(settings.obs_url, "ws://studio.local:4455");
    assert_eq!(settings.obs_password.as_deref(), Some("hunter2"));
    assert!(!settings.mixer_enabled);
    assert_eq!(settings.mixer_poll_interval_ms, 250);
    assert_eq!(settings.gain_broadcast, GainBroadcastPolicy::Confirmed);
    assert_eq!(
        settings.mixer_library_path,
        Settings::default().mixer_library_path
    );
}

#[test]
fn unknown_file_keys_are_rejected() {
    let mut settings = Settings::default();
    assert!(apply_file(&mut settings, "database_url = \"sqlite://x\"").is_err());
}

#[test]
fn prefixed_env_wins_over_alias() {
    let mut settings = Settings::default();
    apply_env(
        &mut settings,
        env_from(&[
            ("OBS_WEBSOCKET_URL", "ws://alias:4455"),
            ("APP__OBS_URL", "ws://prefixed:4455"),
            ("APP__GAIN_BROADCAST", "confirmed"),
            ("APP__MIXER_ENABLED", "true"),
            ("APP__MIXER_LIBRARY_PATH", "/opt/vb/remote.dll"),
        ]),
    );

    assert_eq!(settings.obs_url, "ws://prefixed:4455");
    assert_eq!(settings.gain_broadcast, GainBroadcastPolicy::Confirmed);
    assert!(settings.mixer_enabled);
    assert_eq!(
        settings.mixer_library_path,
        PathBuf::from("/opt/vb/remote.dll")
    );
}

#[test]
fn backend_port_only_replaces_the_port() {
    let mut settings = Settings {
        bind_addr: "127.0.0.1:3000".into(),
        ..Settings::default()
    };
    apply_env(&mut settings, env_from(&[("BACKEND_PORT", "3001")]));
    assert_eq!(settings.bind_addr, "127.0.0.1:3001");

    apply_env(&mut settings, env_from(&[("BACKEND_PORT", "not-a-port")]));
    assert_eq!(settings.bind_addr, "127.0.0.1:3001");
}

#[test]
fn invalid_values_are_ignored_from_env() {
    let mut settings = Settings::default();
    apply_env(
        &mut settings,
        env_from(&[
            ("APP__MIXER_POLL_INTERVAL_MS", "soon"),
            ("APP__GAIN_BROADCAST", "sometimes"),
        ]),
    );
    assert_eq!(settings, Settings::default());
}

#[test]
fn validation_rejects_non_websocket_obs_url() {
    let settings = Settings {
        obs_url: "http://127.0.0.1:4455".into(),
        ..Settings::default()
    };
    assert!(validate(&settings).is_err());

    let settings = Settings {
        mixer_poll_interval_ms: 0,
        ..Settings::default()
    };
    assert!(validate(&settings).is_err());
}

#[test]
fn load_settings_reads_the_given_file() {
    let path = temp_path("load");
    fs::write(&path, "obs_url = \"wss://remote.example:443\"\n").expect("write");

    let settings = load_settings(&path).expect("load");
    fs::remove_file(&path).expect("cleanup");

    // The process environment may still override, so only check what the
    // file controls when no override is present.
    if env::var("APP__OBS_URL").is_err() && env::var("OBS_WEBSOCKET_URL").is_err() {
        assert_eq!(settings.obs_url, "wss://remote.example:443");
    }
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let path = temp_path("missing");
    load_settings(&path).expect("defaults");
}

#[test]
fn malformed_file_is_an_error() {
    let path = temp_path("malformed");
    fs::write(&path, "bind_addr = [").expect("write");

    let result = load_settings(&path);
    fs::remove_file(&path).expect("cleanup");
    assert!(result.is_err());
}
