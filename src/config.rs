// src/config.rs

//! Configuration for the relay demo.
//!
//! Deserialized from a JSON file named by the `GLYPHPIPE_CONFIG`
//! environment variable when present; every field has a sensible default
//! so the binary runs with no file at all. Defaults mirror the original
//! demo's constants: a 4 MiB channel buffer (large enough for the worst
//! glyph bitmap), a 40 MiB scene cap, and 40 benchmark replays.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Process-wide configuration, loaded once.
pub static CONFIG: Lazy<Config> = Lazy::new(Config::load_or_default);

/// Which execution contexts perform final scene composition. The original
/// demo had both processes render; this keeps that choice explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ComposeRole {
    Renderer,
    Worker,
    #[default]
    Both,
}

impl ComposeRole {
    pub fn includes_renderer(self) -> bool {
        matches!(self, ComposeRole::Renderer | ComposeRole::Both)
    }

    pub fn includes_worker(self) -> bool {
        matches!(self, ComposeRole::Worker | ComposeRole::Both)
    }
}

/// Whether the worker runs as a forked process or an in-process thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Process,
    Thread,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub channel: ChannelConfig,
    pub scene: SceneConfig,
    pub run: RunConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Capacity of each role's fixed channel buffer in bytes. Bounds the
    /// largest response frame (header plus bitmap or outline bytes).
    pub buffer_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            buffer_capacity: 4 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Upper bound on the declared scene stream length.
    pub max_scene_bytes: usize,
    /// Composition framebuffer dimensions.
    pub framebuffer_width: usize,
    pub framebuffer_height: usize,
}

impl Default for SceneConfig {
    fn default() -> Self {
        SceneConfig {
            max_scene_bytes: 40 * 1024 * 1024,
            framebuffer_width: 800,
            framebuffer_height: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub mode: RunMode,
    pub compose: ComposeRole,
    /// Benchmark replay count for whichever role(s) compose.
    pub repeat_draws: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            mode: RunMode::default(),
            compose: ComposeRole::default(),
            repeat_draws: 40,
        }
    }
}

impl Config {
    pub fn load_or_default() -> Self {
        match std::env::var("GLYPHPIPE_CONFIG") {
            Ok(path) => match Self::load_from(&path) {
                Ok(config) => {
                    log::info!("loaded configuration from {}", path);
                    config
                }
                Err(e) => {
                    log::warn!("failed to load {}: {:#}; using defaults", path, e);
                    Config::default()
                }
            },
            Err(_) => Config::default(),
        }
    }

    fn load_from(path: &str) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}
