use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     [chat]
//                    send_queue_capacity = 512
//
//   env var:         PARLOR_CHAT__SEND_QUEUE_CAPACITY=512   (double underscore = nesting)
//
// The bare `PORT` and `TURN_*` variables are honoured on top of that for
// compatibility with existing deployments.

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub chat: ChatFileConfig,
    #[serde(default)]
    pub signaling: SignalingFileConfig,
    #[serde(default)]
    pub liveness: LivenessFileConfig,
    #[serde(default)]
    pub history: HistoryFileConfig,
    #[serde(default)]
    pub webrtc: WebRtcFileConfig,
}

/// Listener settings (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
        }
    }
}

/// Chat socket tunables (lives under `[chat]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatFileConfig {
    #[serde(default = "default_chat_max_message_bytes")]
    pub max_message_bytes: usize,
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
}

impl Default for ChatFileConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: default_chat_max_message_bytes(),
            send_queue_capacity: default_send_queue_capacity(),
        }
    }
}

/// Signaling socket tunables (lives under `[signaling]`).
/// Frames carry SDP blobs, hence the larger read limit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignalingFileConfig {
    #[serde(default = "default_signaling_max_message_bytes")]
    pub max_message_bytes: usize,
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
}

impl Default for SignalingFileConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: default_signaling_max_message_bytes(),
            send_queue_capacity: default_send_queue_capacity(),
        }
    }
}

/// Keepalive timing shared by both socket kinds (lives under `[liveness]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LivenessFileConfig {
    #[serde(default = "default_pong_wait_secs")]
    pub pong_wait_secs: u64,
    #[serde(default = "default_write_wait_secs")]
    pub write_wait_secs: u64,
}

impl Default for LivenessFileConfig {
    fn default() -> Self {
        Self {
            pong_wait_secs: default_pong_wait_secs(),
            write_wait_secs: default_write_wait_secs(),
        }
    }
}

/// History endpoint policy (lives under `[history]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryFileConfig {
    #[serde(default = "default_history_limit")]
    pub default_limit: i64,
    #[serde(default = "default_history_max_limit")]
    pub max_limit: i64,
    #[serde(default = "default_channel")]
    pub default_channel: String,
}

impl Default for HistoryFileConfig {
    fn default() -> Self {
        Self {
            default_limit: default_history_limit(),
            max_limit: default_history_max_limit(),
            default_channel: default_channel(),
        }
    }
}

/// ICE server advertisement (lives under `[webrtc]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebRtcFileConfig {
    #[serde(default = "default_stun_urls")]
    pub stun_urls: Vec<String>,
    #[serde(default)]
    pub turn_host: Option<String>,
    #[serde(default = "default_turn_port")]
    pub turn_port: u16,
    #[serde(default)]
    pub turn_username: Option<String>,
    #[serde(default)]
    pub turn_password: Option<String>,
}

impl Default for WebRtcFileConfig {
    fn default() -> Self {
        Self {
            stun_urls: default_stun_urls(),
            turn_host: None,
            turn_port: default_turn_port(),
            turn_username: None,
            turn_password: None,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_static_dir() -> PathBuf {
    PathBuf::from("web/static")
}
fn default_chat_max_message_bytes() -> usize {
    4096
}
fn default_signaling_max_message_bytes() -> usize {
    1 << 20
}
fn default_send_queue_capacity() -> usize {
    256
}
fn default_pong_wait_secs() -> u64 {
    60
}
fn default_write_wait_secs() -> u64 {
    10
}
fn default_history_limit() -> i64 {
    50
}
fn default_history_max_limit() -> i64 {
    200
}
pub fn default_channel() -> String {
    "general".to_string()
}
fn default_stun_urls() -> Vec<String> {
    vec!["stun:stun.l.google.com:19302".to_string()]
}
fn default_turn_port() -> u16 {
    3478
}

/// Build a figment that layers: defaults → config.toml → legacy env vars → PARLOR_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `PARLOR_SERVER__PORT=9000`  →  `server.port = 9000`
///   `PARLOR_LIVENESS__PONG_WAIT_SECS=30`  →  `liveness.pong_wait_secs = 30`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::raw().only(&["PORT"]).map(|_| "server.port".into()))
        .merge(
            Env::raw()
                .only(&["TURN_HOST", "TURN_PORT", "TURN_USERNAME", "TURN_PASSWORD"])
                .map(|key| format!("webrtc.{}", key.as_str().to_ascii_lowercase()).into()),
        )
        .merge(Env::prefixed("PARLOR_").split("__"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig, used throughout the server)
// =============================================================================

/// Per-socket limits handed to the connection pump.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// Largest inbound frame accepted before the socket is torn down
    pub max_message_bytes: usize,
    /// Outbound envelopes that may be pending before the hub evicts the connection
    pub send_queue_capacity: usize,
    /// Window within which the peer must acknowledge a ping
    pub pong_wait: Duration,
    /// Deadline for a single socket write
    pub write_wait: Duration,
}

impl ConnectionLimits {
    /// Pings go out at 9/10 of the pong window so an ack can land before it closes.
    pub fn ping_period(&self) -> Duration {
        self.pong_wait * 9 / 10
    }
}

/// History endpoint policy (runtime view).
#[derive(Clone, Debug)]
pub struct HistoryConfig {
    pub default_limit: i64,
    pub max_limit: i64,
    pub default_channel: String,
}

impl HistoryConfig {
    pub fn from_file(fc: &HistoryFileConfig) -> Self {
        Self {
            default_limit: fc.default_limit,
            max_limit: fc.max_limit,
            default_channel: fc.default_channel.clone(),
        }
    }

    /// Resolve a raw `limit` query value. Anything non-numeric or outside
    /// `1..=max_limit` falls back to the default.
    pub fn resolve_limit(&self, raw: Option<&str>) -> i64 {
        raw.and_then(|s| s.trim().parse::<i64>().ok())
            .filter(|n| (1..=self.max_limit).contains(n))
            .unwrap_or(self.default_limit)
    }

    pub fn resolve_channel(&self, raw: Option<&str>) -> String {
        match raw.map(str::trim) {
            Some(c) if !c.is_empty() => c.to_string(),
            _ => self.default_channel.clone(),
        }
    }
}

/// TURN relay credentials, present only when fully configured.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// ICE server advertisement (runtime view).
#[derive(Clone, Debug)]
pub struct IceConfig {
    pub stun_urls: Vec<String>,
    pub turn: Option<TurnConfig>,
}

impl IceConfig {
    pub fn from_file(fc: &WebRtcFileConfig) -> Self {
        let non_empty = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        // Password is not trimmed: whitespace may be part of the secret.
        let password = fc.turn_password.clone().filter(|p| !p.is_empty());

        let turn = match (non_empty(&fc.turn_host), non_empty(&fc.turn_username), password) {
            (Some(host), Some(username), Some(password)) => Some(TurnConfig {
                host,
                port: fc.turn_port,
                username,
                password,
            }),
            _ => None,
        };

        Self {
            stun_urls: fc.stun_urls.clone(),
            turn,
        }
    }
}

/// Server configuration for runtime behavior.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub static_dir: PathBuf,
    /// Limits for `/ws`
    pub chat: ConnectionLimits,
    /// Limits for `/ws/voice`
    pub signaling: ConnectionLimits,
    pub history: HistoryConfig,
    pub ice: IceConfig,
}

impl ServerConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        let pong_wait = Duration::from_secs(fc.liveness.pong_wait_secs);
        let write_wait = Duration::from_secs(fc.liveness.write_wait_secs);

        Self {
            host: fc.server.host.clone(),
            port: fc.server.port,
            static_dir: fc.server.static_dir.clone(),
            chat: ConnectionLimits {
                max_message_bytes: fc.chat.max_message_bytes,
                send_queue_capacity: fc.chat.send_queue_capacity.max(1),
                pong_wait,
                write_wait,
            },
            signaling: ConnectionLimits {
                max_message_bytes: fc.signaling.max_message_bytes,
                send_queue_capacity: fc.signaling.send_queue_capacity.max(1),
                pong_wait,
                write_wait,
            },
            history: HistoryConfig::from_file(&fc.history),
            ice: IceConfig::from_file(&fc.webrtc),
        }
    }
}

// =============================================================================
// Directory layout config (not tunable via figment; derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ParlorConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
}

impl ParlorConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = custom_dir.unwrap_or_else(|| PathBuf::from("data"));

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let db_path = data_dir.join("chat.db");

        info!("Data directory: {}", data_dir.display());

        Ok(Self { data_dir, db_path })
    }

    pub fn db_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path.display())
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ────────────────────────────────────────────────────────

    #[test]
    fn test_file_config_defaults() {
        let d = FileConfig::default();
        assert_eq!(d.server.port, 8000);
        assert_eq!(d.chat.max_message_bytes, 4096);
        assert_eq!(d.signaling.max_message_bytes, 1024 * 1024);
        assert_eq!(d.chat.send_queue_capacity, 256);
        assert_eq!(d.liveness.pong_wait_secs, 60);
        assert_eq!(d.liveness.write_wait_secs, 10);
        assert_eq!(d.history.default_channel, "general");
    }

    #[test]
    fn test_ping_period_is_nine_tenths_of_pong_wait() {
        let sc = ServerConfig::from_file(&FileConfig::default());
        assert_eq!(sc.chat.ping_period(), Duration::from_secs(54));
        assert!(sc.signaling.ping_period() < sc.signaling.pong_wait);
    }

    // ── HistoryConfig ───────────────────────────────────────────────────

    #[test]
    fn test_resolve_limit() {
        let h = HistoryConfig::from_file(&HistoryFileConfig::default());
        assert_eq!(h.resolve_limit(None), 50);
        assert_eq!(h.resolve_limit(Some("10")), 10);
        assert_eq!(h.resolve_limit(Some("200")), 200);
        assert_eq!(h.resolve_limit(Some("201")), 50);
        assert_eq!(h.resolve_limit(Some("0")), 50);
        assert_eq!(h.resolve_limit(Some("-3")), 50);
        assert_eq!(h.resolve_limit(Some("lots")), 50);
    }

    #[test]
    fn test_resolve_channel() {
        let h = HistoryConfig::from_file(&HistoryFileConfig::default());
        assert_eq!(h.resolve_channel(None), "general");
        assert_eq!(h.resolve_channel(Some("  ")), "general");
        assert_eq!(h.resolve_channel(Some("random")), "random");
    }

    // ── IceConfig ───────────────────────────────────────────────────────

    #[test]
    fn test_ice_config_stun_only_by_default() {
        let ice = IceConfig::from_file(&WebRtcFileConfig::default());
        assert_eq!(ice.stun_urls, vec!["stun:stun.l.google.com:19302"]);
        assert!(ice.turn.is_none());
    }

    #[test]
    fn test_ice_config_requires_all_turn_fields() {
        let partial = WebRtcFileConfig {
            turn_host: Some("turn.example.org".into()),
            turn_username: Some("user".into()),
            ..Default::default()
        };
        assert!(IceConfig::from_file(&partial).turn.is_none());

        let full = WebRtcFileConfig {
            turn_host: Some(" turn.example.org ".into()),
            turn_username: Some("user".into()),
            turn_password: Some("secret".into()),
            ..Default::default()
        };
        let turn = IceConfig::from_file(&full).turn.unwrap();
        assert_eq!(turn.host, "turn.example.org");
        assert_eq!(turn.port, 3478);
    }

    // ── ParlorConfig ────────────────────────────────────────────────────

    #[test]
    fn test_parlor_config_with_custom_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let config = ParlorConfig::new(Some(tmp.path().join("nested"))).unwrap();

        assert!(tmp.path().join("nested").exists());
        assert_eq!(config.db_path, tmp.path().join("nested").join("chat.db"));
        assert!(config.db_url().starts_with("sqlite://"));
        assert!(config.db_url().ends_with("?mode=rwc"));
    }

    // ── load_config ─────────────────────────────────────────────────────

    #[test]
    fn test_load_config_toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "[server]\nport = 9100\n\n[chat]\nsend_queue_capacity = 8\n",
        )
        .unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.server.port, 9100);
        assert_eq!(fc.chat.send_queue_capacity, 8);
        assert_eq!(fc.chat.max_message_bytes, 4096);
    }

    #[test]
    fn test_load_config_env_overrides() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("PORT", "9200");
            jail.set_env("TURN_HOST", "turn.example.org");
            jail.set_env("PARLOR_LIVENESS__PONG_WAIT_SECS", "30");
            let fc: FileConfig = load_config(jail.directory()).extract()?;
            assert_eq!(fc.server.port, 9200);
            assert_eq!(fc.webrtc.turn_host.as_deref(), Some("turn.example.org"));
            assert_eq!(fc.liveness.pong_wait_secs, 30);
            Ok(())
        });
    }
}
