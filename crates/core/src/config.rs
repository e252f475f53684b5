use serde::{Deserialize, Serialize};
use std::path::Path;

/// How an operator-supplied prompt fragment combines with the built-in
/// prompt for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptMode {
    Append,
    Override,
}

/// Which inbound images are eligible for description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageScope {
    All,
    MentionOnly,
}

/// What happens to an image whose description fails or times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDegrade {
    /// Keep the message, replace the image with a placeholder marker.
    Strip,
    /// Drop the image segment entirely.
    Drop,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// All engine parameters. Loaded from a JSON file at startup; first boot
/// writes defaults, subsequent boots read existing values. Fields missing
/// from the file fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineCfg {
    // identity
    pub self_id: String,
    pub self_name: String,
    pub persona: String,

    // channel screen
    pub enabled_channels: Vec<String>,
    pub blacklist_keywords: Vec<String>,
    pub trigger_keywords: Vec<String>,

    // reply probability
    pub base_probability: f64,
    pub probability_min: f64,
    pub probability_max: f64,

    // attention model
    pub attention_enabled: bool,
    pub attention_halflife_secs: f64,
    pub emotion_halflife_secs: f64,
    pub attention_boost_step: f64,
    pub attention_decrease_step: f64,
    pub emotion_step: f64,
    pub attention_duration_secs: f64,
    pub attention_max_users: usize,
    pub attention_probability_gain: f64,

    // short-term cache
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,
    pub cache_sweep_interval_secs: u64,

    // context & model calls; negative = unbounded history, 0 = none
    pub max_context_messages: i64,
    pub decision_timeout_secs: u64,
    pub generation_timeout_secs: u64,
    pub decision_prompt_mode: PromptMode,
    pub decision_extra_prompt: String,
    pub reply_prompt_mode: PromptMode,
    pub reply_extra_prompt: String,

    // vision
    pub vision_enabled: bool,
    pub vision_timeout_secs: u64,
    pub image_scope: ImageScope,
    pub image_degrade: ImageDegrade,
    pub image_prompt: String,

    // humanization
    pub typo_enabled: bool,
    pub typo_min_chars: usize,
    pub typo_activation: f64,
    pub typo_per_char: f64,
    pub typing_enabled: bool,
    pub typing_chars_per_sec: f64,
    pub typing_min_delay_secs: f64,
    pub typing_max_delay_secs: f64,
    pub typing_skip_under_chars: usize,

    // frequency governor
    pub frequency_enabled: bool,
    pub frequency_interval_secs: u64,
    pub frequency_min_count: usize,

    // persistence
    pub data_dir: String,
    pub snapshot_flush_interval_secs: u64,
}

impl Default for EngineCfg {
    fn default() -> Self {
        Self {
            self_id: "attune".into(),
            self_name: "attune".into(),
            persona: "a laid-back group chat regular who replies briefly and naturally".into(),
            enabled_channels: vec!["repl:local".into()],
            blacklist_keywords: Vec::new(),
            trigger_keywords: Vec::new(),
            base_probability: 0.3,
            probability_min: 0.05,
            probability_max: 0.95,
            attention_enabled: true,
            attention_halflife_secs: 300.0,
            emotion_halflife_secs: 600.0,
            attention_boost_step: 0.3,
            attention_decrease_step: 0.1,
            emotion_step: 0.1,
            attention_duration_secs: 600.0,
            attention_max_users: 50,
            attention_probability_gain: 0.5,
            cache_capacity: 10,
            cache_ttl_secs: 1800,
            cache_sweep_interval_secs: 60,
            max_context_messages: 30,
            decision_timeout_secs: 10,
            generation_timeout_secs: 30,
            decision_prompt_mode: PromptMode::Append,
            decision_extra_prompt: String::new(),
            reply_prompt_mode: PromptMode::Append,
            reply_extra_prompt: String::new(),
            vision_enabled: false,
            vision_timeout_secs: 20,
            image_scope: ImageScope::MentionOnly,
            image_degrade: ImageDegrade::Strip,
            image_prompt: "Briefly describe this image for chat context.".into(),
            typo_enabled: true,
            typo_min_chars: 10,
            typo_activation: 0.3,
            typo_per_char: 0.02,
            typing_enabled: true,
            typing_chars_per_sec: 15.0,
            typing_min_delay_secs: 0.5,
            typing_max_delay_secs: 3.0,
            typing_skip_under_chars: 3,
            frequency_enabled: true,
            frequency_interval_secs: 180,
            frequency_min_count: 8,
            data_dir: "data".into(),
            snapshot_flush_interval_secs: 60,
        }
    }
}

impl EngineCfg {
    /// Load config from `path`. A missing file is seeded with defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let cfg = Self::default();
            cfg.seed(path)?;
            return Ok(cfg);
        }
        let raw = std::fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Write the current values out as a formatted JSON file.
    fn seed(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.base_probability) {
            return Err(ConfigError::Invalid("base_probability must be in [0, 1]".into()));
        }
        if self.probability_min > self.probability_max {
            return Err(ConfigError::Invalid(
                "probability_min must not exceed probability_max".into(),
            ));
        }
        if self.typing_min_delay_secs > self.typing_max_delay_secs {
            return Err(ConfigError::Invalid(
                "typing_min_delay_secs must not exceed typing_max_delay_secs".into(),
            ));
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::Invalid("cache_capacity must be at least 1".into()));
        }
        if self.attention_max_users == 0 {
            return Err(ConfigError::Invalid("attention_max_users must be at least 1".into()));
        }
        if self.decision_prompt_mode == PromptMode::Override
            && self.decision_extra_prompt.trim().is_empty()
        {
            return Err(ConfigError::Invalid(
                "decision_extra_prompt must be set when decision_prompt_mode is override".into(),
            ));
        }
        if self.reply_prompt_mode == PromptMode::Override
            && self.reply_extra_prompt.trim().is_empty()
        {
            return Err(ConfigError::Invalid(
                "reply_extra_prompt must be set when reply_prompt_mode is override".into(),
            ));
        }
        Ok(())
    }

    /// How long a user profile survives without interaction before the
    /// cleanup pass may remove it.
    pub fn retention_window_secs(&self) -> f64 {
        self.attention_duration_secs * 3.0
    }
}
