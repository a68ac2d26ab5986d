use std::{fs, path::Path, time::Duration};

use shared::domain::UserId;
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "client.toml";

/// Timing constants of the synchronizer, typing machine and call controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub typing_start_delay: Duration,
    pub typing_stop_delay: Duration,
    pub remote_typing_ttl: Duration,
    pub presence_refresh_interval: Duration,
    pub online_window: Duration,
    pub call_tick_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            typing_start_delay: Duration::from_secs(1),
            typing_stop_delay: Duration::from_secs(3),
            remote_typing_ttl: Duration::from_secs(3),
            presence_refresh_interval: Duration::from_secs(30),
            online_window: Duration::from_secs(5 * 60),
            call_tick_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server_url: String,
    pub api_token: Option<String>,
    pub local_user_id: Option<UserId>,
    pub call_test_mode: bool,
    pub call_sdk_configured: bool,
    pub timings: Timings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000".into(),
            api_token: None,
            local_user_id: None,
            call_test_mode: false,
            call_sdk_configured: false,
            timings: Timings::default(),
        }
    }
}

impl Settings {
    /// Test mode only applies while no call SDK credentials are configured.
    pub fn uses_loopback_calls(&self) -> bool {
        self.call_test_mode && !self.call_sdk_configured
    }
}

pub fn load_settings() -> Settings {
    load_settings_from(Path::new(DEFAULT_CONFIG_PATH))
}

pub fn load_settings_from(path: &Path) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        apply_file_config(&mut settings, &raw);
    }
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());

    settings
}

fn apply_file_config(settings: &mut Settings, raw: &str) {
    let table = match raw.parse::<toml::Table>() {
        Ok(table) => table,
        Err(err) => {
            warn!(%err, "config: ignoring unparsable client config file");
            return;
        }
    };

    if let Some(v) = table.get("server_url").and_then(|v| v.as_str()) {
        settings.server_url = v.to_string();
    }
    if let Some(v) = table.get("api_token").and_then(|v| v.as_str()) {
        settings.api_token = Some(v.to_string());
    }
    if let Some(v) = table.get("local_user_id").and_then(|v| v.as_integer()) {
        settings.local_user_id = Some(UserId(v));
    }
    if let Some(v) = table.get("call_test_mode").and_then(|v| v.as_bool()) {
        settings.call_test_mode = v;
    }
    if let Some(v) = table.get("call_sdk_configured").and_then(|v| v.as_bool()) {
        settings.call_sdk_configured = v;
    }

    let millis = |key: &str| {
        table
            .get(key)
            .and_then(|v| v.as_integer())
            .and_then(|v| u64::try_from(v).ok())
            .map(Duration::from_millis)
    };
    let timings = &mut settings.timings;
    if let Some(v) = millis("typing_start_delay_ms") {
        timings.typing_start_delay = v;
    }
    if let Some(v) = millis("typing_stop_delay_ms") {
        timings.typing_stop_delay = v;
    }
    if let Some(v) = millis("remote_typing_ttl_ms") {
        timings.remote_typing_ttl = v;
    }
    if let Some(v) = millis("presence_refresh_interval_ms") {
        timings.presence_refresh_interval = v;
    }
    if let Some(v) = millis("online_window_ms") {
        timings.online_window = v;
    }
    if let Some(v) = millis("call_tick_interval_ms") {
        timings.call_tick_interval = v;
    }
}

fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = lookup("APP__SERVER_URL") {
        settings.server_url = v;
    }

    if let Some(v) = lookup("APP__API_TOKEN") {
        settings.api_token = Some(v);
    }

    if let Some(v) = lookup("APP__LOCAL_USER_ID") {
        match v.parse::<i64>() {
            Ok(parsed) => settings.local_user_id = Some(UserId(parsed)),
            Err(err) => warn!(value = %v, %err, "config: invalid APP__LOCAL_USER_ID"),
        }
    }

    if let Some(v) = lookup("APP__CALL_TEST_MODE") {
        settings.call_test_mode = parse_flag(&v);
    }
    if let Some(v) = lookup("APP__CALL_SDK_CONFIGURED") {
        settings.call_sdk_configured = parse_flag(&v);
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
