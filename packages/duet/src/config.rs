use anyhow::{Context, Result};
use duet_protocol::{RoomName, Speaker};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::extract::SpeakerTags;

// =============================================================================
// Unified config (figment-deserialized from defaults / duet.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   duet.toml:       [router]
//                    ack_timeout_ms = 3000
//
//   env var:         DUET_ROUTER__ACK_TIMEOUT_MS=3000   (double underscore = nesting)
//
//   (single underscore stays within field names: DUET_GENERATION__PROMPT_FILE)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub relay: RelayFileConfig,
    #[serde(default)]
    pub router: RouterFileConfig,
    #[serde(default)]
    pub generation: GenerationFileConfig,
    #[serde(default)]
    pub chat: ChatFileConfig,
}

/// Relay tunables (lives under `[relay]` in duet.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelayFileConfig {
    #[serde(default = "default_relay_host")]
    pub host: String,
    #[serde(default = "default_relay_port")]
    pub port: u16,
    /// Room joined by connections whose path is not in the lookup table.
    #[serde(default = "default_room")]
    pub default_room: RoomName,
    #[serde(default = "default_peer_queue_capacity")]
    pub peer_queue_capacity: usize,
}

impl Default for RelayFileConfig {
    fn default() -> Self {
        Self {
            host: default_relay_host(),
            port: default_relay_port(),
            default_room: default_room(),
            peer_queue_capacity: default_peer_queue_capacity(),
        }
    }
}

/// Router tunables (lives under `[router]` in duet.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouterFileConfig {
    #[serde(default = "default_relay_url")]
    pub relay_url: String,
    #[serde(default = "default_path_a")]
    pub path_a: String,
    #[serde(default = "default_path_b")]
    pub path_b: String,
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Character budget of the dialogue history fed into each prompt.
    #[serde(default = "default_history_budget")]
    pub history_budget: usize,
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,
    /// A chat seen on both endpoints within this window is handled once.
    #[serde(default = "default_chat_dedup_window_ms")]
    pub chat_dedup_window_ms: u64,
}

impl Default for RouterFileConfig {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            path_a: default_path_a(),
            path_b: default_path_b(),
            ack_timeout_ms: default_ack_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            history_budget: default_history_budget(),
            inbound_capacity: default_inbound_capacity(),
            chat_dedup_window_ms: default_chat_dedup_window_ms(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Google Gemini streaming API
    Gemini,
    /// Canned replies read from a script file
    Scripted,
}

/// Generation tunables (lives under `[generation]` in duet.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationFileConfig {
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Falls back to `GOOGLE_API_KEY` when unset.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Dual-character system prompt. Required.
    #[serde(default)]
    pub prompt_file: Option<PathBuf>,
    #[serde(default)]
    pub script_file: Option<PathBuf>,
    #[serde(default)]
    pub use_search_grounding: bool,
    #[serde(default = "default_reply_char_limit")]
    pub reply_char_limit: usize,
    /// Label for character A in history lines, prompt rules and spans.
    #[serde(default = "default_tag_a")]
    pub tag_a: String,
    #[serde(default = "default_tag_b")]
    pub tag_b: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Longest silence tolerated between two reads of a streaming response.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for GenerationFileConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            model: default_model(),
            api_base: default_api_base(),
            api_key: None,
            prompt_file: None,
            script_file: None,
            use_search_grounding: false,
            reply_char_limit: default_reply_char_limit(),
            tag_a: default_tag_a(),
            tag_b: default_tag_b(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

/// Chat-platform bridge tunables (lives under `[chat]` in duet.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatFileConfig {
    #[serde(default = "default_prefix_a")]
    pub prefix_a: String,
    #[serde(default = "default_prefix_b")]
    pub prefix_b: String,
    #[serde(default = "default_source")]
    pub default_source: Speaker,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub mirror_turns: bool,
}

impl Default for ChatFileConfig {
    fn default() -> Self {
        Self {
            prefix_a: default_prefix_a(),
            prefix_b: default_prefix_b(),
            default_source: default_source(),
            poll_interval_ms: default_poll_interval_ms(),
            mirror_turns: false,
        }
    }
}

fn default_relay_host() -> String {
    "127.0.0.1".to_string()
}
fn default_relay_port() -> u16 {
    8765
}
fn default_room() -> RoomName {
    RoomName::Paired
}
fn default_peer_queue_capacity() -> usize {
    256
}
fn default_relay_url() -> String {
    "ws://127.0.0.1:8765".to_string()
}
fn default_path_a() -> String {
    "/WA".to_string()
}
fn default_path_b() -> String {
    "/WB".to_string()
}
fn default_ack_timeout_ms() -> u64 {
    5000
}
fn default_reconnect_delay_ms() -> u64 {
    1000
}
fn default_history_budget() -> usize {
    500
}
fn default_inbound_capacity() -> usize {
    256
}
fn default_chat_dedup_window_ms() -> u64 {
    1000
}
fn default_backend() -> BackendKind {
    BackendKind::Gemini
}
fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_api_base() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_reply_char_limit() -> usize {
    500
}
fn default_tag_a() -> String {
    "A".to_string()
}
fn default_tag_b() -> String {
    "B".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_read_timeout_ms() -> u64 {
    30_000
}
fn default_prefix_a() -> String {
    "ir".to_string()
}
fn default_prefix_b() -> String {
    "fi".to_string()
}
fn default_source() -> Speaker {
    Speaker::A
}
fn default_poll_interval_ms() -> u64 {
    3000
}

/// Build a figment that layers: defaults → duet.toml → DUET_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `DUET_RELAY__PORT=9000`  →  `relay.port = 9000`
///   `DUET_GENERATION__BACKEND=scripted`  →  `generation.backend = "scripted"`
pub fn load_config(config_path: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_path))
        .merge(Env::prefixed("DUET_").split("__"))
}

/// Extract the file config, with a readable error for bad values.
pub fn read_config(config_path: &Path) -> Result<FileConfig> {
    load_config(config_path)
        .extract()
        .with_context(|| format!("Invalid configuration ({})", config_path.display()))
}

// =============================================================================
// Runtime config structs (derived from FileConfig)
// =============================================================================

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub bind_addr: SocketAddr,
    pub default_room: RoomName,
    pub peer_queue_capacity: usize,
}

impl RelayConfig {
    pub fn from_file(fc: &RelayFileConfig) -> Result<Self> {
        let bind_addr = format!("{}:{}", fc.host, fc.port)
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid relay bind address {}:{}", fc.host, fc.port))?;
        Ok(Self {
            bind_addr,
            default_room: fc.default_room,
            peer_queue_capacity: fc.peer_queue_capacity.max(1),
        })
    }
}

#[derive(Clone, Debug)]
pub struct RouterConfig {
    pub url_a: String,
    pub url_b: String,
    pub ack_timeout: Duration,
    pub reconnect_delay: Duration,
    pub history_budget: usize,
    pub inbound_capacity: usize,
    pub chat_dedup_window: Duration,
}

impl RouterConfig {
    pub fn from_file(fc: &RouterFileConfig) -> Self {
        let base = fc.relay_url.trim_end_matches('/');
        Self {
            url_a: format!("{}{}", base, fc.path_a),
            url_b: format!("{}{}", base, fc.path_b),
            ack_timeout: Duration::from_millis(fc.ack_timeout_ms),
            reconnect_delay: Duration::from_millis(fc.reconnect_delay_ms),
            history_budget: fc.history_budget,
            inbound_capacity: fc.inbound_capacity.max(1),
            chat_dedup_window: Duration::from_millis(fc.chat_dedup_window_ms),
        }
    }

    pub fn endpoint_url(&self, speaker: Speaker) -> &str {
        match speaker {
            Speaker::A => &self.url_a,
            Speaker::B => &self.url_b,
        }
    }
}

#[derive(Clone, Debug)]
pub struct GenerationConfig {
    pub backend: BackendKind,
    pub model: String,
    pub api_base: String,
    pub api_key: Option<String>,
    pub system_prompt: String,
    pub script_file: Option<PathBuf>,
    pub use_search_grounding: bool,
    pub reply_char_limit: usize,
    pub tags: SpeakerTags,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl GenerationConfig {
    /// Reads the prompt file; a missing prompt or key is a startup error.
    pub fn from_file(fc: &GenerationFileConfig) -> Result<Self> {
        let prompt_path = fc
            .prompt_file
            .as_ref()
            .context("generation.prompt_file is not set")?;
        let system_prompt = std::fs::read_to_string(prompt_path)
            .with_context(|| format!("Failed to read prompt file: {:?}", prompt_path))?;

        let api_key = fc
            .api_key
            .clone()
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .filter(|k| !k.is_empty());

        let tags = SpeakerTags::new(fc.tag_a.clone(), fc.tag_b.clone())
            .context("Invalid generation.tag_a / generation.tag_b")?;

        match fc.backend {
            BackendKind::Gemini if api_key.is_none() => {
                anyhow::bail!("Gemini backend needs generation.api_key or GOOGLE_API_KEY")
            }
            BackendKind::Scripted if fc.script_file.is_none() => {
                anyhow::bail!("Scripted backend needs generation.script_file")
            }
            _ => {}
        }

        Ok(Self {
            backend: fc.backend,
            model: fc.model.clone(),
            api_base: fc.api_base.trim_end_matches('/').to_string(),
            api_key,
            system_prompt,
            script_file: fc.script_file.clone(),
            use_search_grounding: fc.use_search_grounding,
            reply_char_limit: fc.reply_char_limit,
            tags,
            connect_timeout: Duration::from_millis(fc.connect_timeout_ms),
            read_timeout: Duration::from_millis(fc.read_timeout_ms),
        })
    }
}

#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub prefix_a: String,
    pub prefix_b: String,
    pub default_source: Speaker,
    pub poll_interval: Duration,
    pub mirror_turns: bool,
}

impl ChatConfig {
    pub fn from_file(fc: &ChatFileConfig) -> Self {
        Self {
            prefix_a: fc.prefix_a.clone(),
            prefix_b: fc.prefix_b.clone(),
            default_source: fc.default_source,
            poll_interval: Duration::from_millis(fc.poll_interval_ms),
            mirror_turns: fc.mirror_turns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ────────────────────────────────────────────────────────

    #[test]
    fn test_relay_file_config_defaults() {
        let d = RelayFileConfig::default();
        assert_eq!(d.host, "127.0.0.1");
        assert_eq!(d.port, 8765);
        assert_eq!(d.default_room, RoomName::Paired);
    }

    #[test]
    fn test_router_file_config_defaults() {
        let d = RouterFileConfig::default();
        assert_eq!(d.ack_timeout_ms, 5000);
        assert_eq!(d.reconnect_delay_ms, 1000);
        assert_eq!(d.history_budget, 500);
        assert_eq!(d.path_a, "/WA");
        assert_eq!(d.path_b, "/WB");
    }

    // ── runtime views ───────────────────────────────────────────────────

    #[test]
    fn test_router_config_builds_endpoint_urls() {
        let fc = RouterFileConfig {
            relay_url: "ws://relay.local:9000/".to_string(),
            ..Default::default()
        };
        let rc = RouterConfig::from_file(&fc);
        assert_eq!(rc.endpoint_url(Speaker::A), "ws://relay.local:9000/WA");
        assert_eq!(rc.endpoint_url(Speaker::B), "ws://relay.local:9000/WB");
        assert_eq!(rc.ack_timeout, Duration::from_secs(5));
        assert_eq!(rc.reconnect_delay, Duration::from_secs(1));
        assert_eq!(rc.chat_dedup_window, Duration::from_secs(1));
    }

    #[test]
    fn test_relay_config_rejects_bad_host() {
        let fc = RelayFileConfig {
            host: "not a host".to_string(),
            ..Default::default()
        };
        assert!(RelayConfig::from_file(&fc).is_err());
    }

    #[test]
    fn test_generation_config_requires_prompt_file() {
        let fc = GenerationFileConfig {
            backend: BackendKind::Scripted,
            script_file: Some(PathBuf::from("script.txt")),
            ..Default::default()
        };
        let err = GenerationConfig::from_file(&fc).unwrap_err();
        assert!(err.to_string().contains("prompt_file"));
    }

    #[test]
    fn test_generation_config_reads_prompt() {
        let tmp = tempfile::tempdir().unwrap();
        let prompt = tmp.path().join("dual.txt");
        std::fs::write(&prompt, "You are A and B.").unwrap();
        let fc = GenerationFileConfig {
            backend: BackendKind::Scripted,
            prompt_file: Some(prompt),
            script_file: Some(tmp.path().join("script.txt")),
            ..Default::default()
        };
        let gc = GenerationConfig::from_file(&fc).unwrap();
        assert_eq!(gc.system_prompt, "You are A and B.");
        assert_eq!(gc.reply_char_limit, 500);
        assert_eq!(gc.tags.tag(Speaker::A), "A");
        assert_eq!(gc.tags.tag(Speaker::B), "B");
        assert_eq!(gc.connect_timeout, Duration::from_secs(10));
        assert_eq!(gc.read_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_generation_config_custom_tags() {
        let tmp = tempfile::tempdir().unwrap();
        let prompt = tmp.path().join("dual.txt");
        std::fs::write(&prompt, "p").unwrap();
        let mut fc = GenerationFileConfig {
            backend: BackendKind::Scripted,
            prompt_file: Some(prompt),
            script_file: Some(tmp.path().join("script.txt")),
            tag_a: "Iris".to_string(),
            tag_b: "Fiona".to_string(),
            ..Default::default()
        };
        let gc = GenerationConfig::from_file(&fc).unwrap();
        assert_eq!(gc.tags.tag(Speaker::A), "Iris");
        assert_eq!(gc.tags.tag(Speaker::B), "Fiona");

        fc.tag_b = "Iris".to_string();
        let err = GenerationConfig::from_file(&fc).unwrap_err();
        assert!(err.to_string().contains("tag_a"));
    }

    #[test]
    fn test_generation_config_scripted_needs_script() {
        let tmp = tempfile::tempdir().unwrap();
        let prompt = tmp.path().join("dual.txt");
        std::fs::write(&prompt, "p").unwrap();
        let fc = GenerationFileConfig {
            backend: BackendKind::Scripted,
            prompt_file: Some(prompt),
            ..Default::default()
        };
        assert!(GenerationConfig::from_file(&fc).is_err());
    }

    // ── load_config ─────────────────────────────────────────────────────

    #[test]
    fn test_load_config_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(&tmp.path().join("duet.toml"))
            .extract()
            .unwrap();
        assert_eq!(fc.relay.port, 8765);
        assert_eq!(fc.generation.backend, BackendKind::Gemini);
        assert_eq!(fc.chat.prefix_a, "ir");
    }

    #[test]
    fn test_load_config_toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("duet.toml");
        std::fs::write(
            &path,
            "[relay]\nport = 9100\ndefault_room = \"soloB\"\n\n[router]\nack_timeout_ms = 250\n\n[generation]\nbackend = \"scripted\"\n",
        )
        .unwrap();
        let fc: FileConfig = load_config(&path).extract().unwrap();
        assert_eq!(fc.relay.port, 9100);
        assert_eq!(fc.relay.default_room, RoomName::SoloB);
        assert_eq!(fc.router.ack_timeout_ms, 250);
        assert_eq!(fc.generation.backend, BackendKind::Scripted);
    }

    #[test]
    fn test_read_config_reports_bad_room() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("duet.toml");
        std::fs::write(&path, "[relay]\ndefault_room = \"lobby\"\n").unwrap();
        assert!(read_config(&path).is_err());
    }
}
