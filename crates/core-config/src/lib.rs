//! Configuration loading and parsing.
//!
//! Parses `wordsmith.toml` (or an override path supplied by the binary). Every
//! section and field is optional; missing values fall back to defaults and
//! unknown fields are ignored so older binaries tolerate newer files. A file
//! that fails to parse is treated as absent.
//!
//! Values outside their sane range are clamped by [`Config::apply_limits`],
//! which logs each adjustment on the `config` target. The raw parsed value is
//! kept in `file` so diagnostics can show what the user asked for.

use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::{info, warn};

pub const CONFIG_FILE_NAME: &str = "wordsmith.toml";

const MAX_SUGGESTION_DEBOUNCE_MS: u64 = 5_000;
const MIN_AUTOSAVE_DEBOUNCE_MS: u64 = 100;
const MAX_AUTOSAVE_DEBOUNCE_MS: u64 = 60_000;
const MAX_HISTORY_DEPTH: usize = 10_000;

#[derive(Debug, Deserialize, Clone)]
pub struct SuggestionConfig {
    #[serde(default = "SuggestionConfig::default_enabled")]
    pub enabled: bool,
    /// Quiet period after a deletion before a trigger may fire again.
    #[serde(default = "SuggestionConfig::default_debounce_ms")]
    pub debounce_ms: u64,
    /// Colour marking pending (uncommitted) suggestion text.
    #[serde(default = "SuggestionConfig::default_pending_color")]
    pub pending_color: String,
    /// Words that must be available before a request is issued.
    #[serde(default = "SuggestionConfig::default_min_request_words")]
    pub min_request_words: u32,
    #[serde(default = "SuggestionConfig::default_language")]
    pub language: String,
    #[serde(default)]
    pub tone: Option<String>,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            debounce_ms: Self::default_debounce_ms(),
            pending_color: Self::default_pending_color(),
            min_request_words: Self::default_min_request_words(),
            language: Self::default_language(),
            tone: None,
        }
    }
}

impl SuggestionConfig {
    const fn default_enabled() -> bool {
        true
    }
    const fn default_debounce_ms() -> u64 {
        200
    }
    fn default_pending_color() -> String {
        "#9ca3af".to_string()
    }
    const fn default_min_request_words() -> u32 {
        1
    }
    fn default_language() -> String {
        "en".to_string()
    }
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    /// Consecutive user edits closer than this merge into one undo step.
    #[serde(default = "HistoryConfig::default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "HistoryConfig::default_max_depth")]
    pub max_depth: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            delay_ms: Self::default_delay_ms(),
            max_depth: Self::default_max_depth(),
        }
    }
}

impl HistoryConfig {
    const fn default_delay_ms() -> u64 {
        1000
    }
    const fn default_max_depth() -> usize {
        200
    }
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AutosaveConfig {
    #[serde(default = "AutosaveConfig::default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            debounce_ms: Self::default_debounce_ms(),
        }
    }
}

impl AutosaveConfig {
    const fn default_debounce_ms() -> u64 {
        1000
    }
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CitationConfig {
    /// Style name understood by `core-cite` (`numeric`, `author-date`, ...).
    #[serde(default = "CitationConfig::default_style")]
    pub style: String,
}

impl Default for CitationConfig {
    fn default() -> Self {
        Self {
            style: Self::default_style(),
        }
    }
}

impl CitationConfig {
    fn default_style() -> String {
        "numeric".to_string()
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub suggestion: SuggestionConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub autosave: AutosaveConfig,
    #[serde(default)]
    pub citation: CitationConfig,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub raw: Option<String>, // original file string (optional)
    pub file: ConfigFile,    // parsed (or default) data, clamped
    pub path: Option<PathBuf>,
}

/// Local working directory first, then the platform config dir.
pub fn discover() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("wordsmith").join(CONFIG_FILE_NAME);
    }
    PathBuf::from(CONFIG_FILE_NAME)
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    let Ok(content) = fs::read_to_string(&path) else {
        return Ok(Config::default());
    };
    match toml::from_str::<ConfigFile>(&content) {
        Ok(file) => {
            let mut cfg = Config {
                raw: Some(content),
                file,
                path: Some(path),
            };
            cfg.apply_limits();
            Ok(cfg)
        }
        Err(e) => {
            warn!(target: "config", path = %path.display(), error = %e, "config_parse_failed_using_defaults");
            Ok(Config::default())
        }
    }
}

impl Config {
    /// Clamp out-of-range values. Returns the number of adjusted fields.
    pub fn apply_limits(&mut self) -> usize {
        let mut adjusted = 0;
        let s = &mut self.file.suggestion;
        if s.debounce_ms > MAX_SUGGESTION_DEBOUNCE_MS {
            info!(target: "config", raw = s.debounce_ms, clamped = MAX_SUGGESTION_DEBOUNCE_MS, "suggestion_debounce_clamped");
            s.debounce_ms = MAX_SUGGESTION_DEBOUNCE_MS;
            adjusted += 1;
        }
        let a = &mut self.file.autosave;
        let clamped = a
            .debounce_ms
            .clamp(MIN_AUTOSAVE_DEBOUNCE_MS, MAX_AUTOSAVE_DEBOUNCE_MS);
        if clamped != a.debounce_ms {
            info!(target: "config", raw = a.debounce_ms, clamped, "autosave_debounce_clamped");
            a.debounce_ms = clamped;
            adjusted += 1;
        }
        let h = &mut self.file.history;
        let clamped = h.max_depth.clamp(1, MAX_HISTORY_DEPTH);
        if clamped != h.max_depth {
            info!(target: "config", raw = h.max_depth, clamped, "history_depth_clamped");
            h.max_depth = clamped;
            adjusted += 1;
        }
        adjusted
    }
}
