//! Configuration module for the tutor gateway
//!
//! All configuration comes from environment variables (with `.env` support via
//! `dotenvy`, loaded in `main` before this module runs). Every tunable has a
//! default; only the LLM API key is mandatory.

use std::time::Duration;

use thiserror::Error;

/// Errors produced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing or empty
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),

    /// An environment variable could not be parsed
    #[error("invalid value for {name}: {value:?}")]
    InvalidVar { name: &'static str, value: String },
}

/// Echo-suppression and auto-barge tuning windows.
///
/// These mirror the live-tuned values of the voice loop: the guard right
/// after TTS begins, the window in which a voice-activity event must be
/// confirmed by a real transcript, the minimum spacing between auto-barges,
/// and the cooldown after TTS during which near-duplicate transcripts are
/// treated as the tutor hearing itself.
#[derive(Debug, Clone)]
pub struct EchoConfig {
    /// Suppress `SpeechStarted` events this soon after TTS begins
    pub start_guard: Duration,
    /// Maximum delay between `SpeechStarted` and a confirming transcript
    pub confirm_window: Duration,
    /// Minimum interval between two auto-barges
    pub debounce: Duration,
    /// Window after the last TTS chunk in which transcripts are checked
    /// against the tutor's own utterance
    pub cooldown: Duration,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            start_guard: Duration::from_millis(250),
            confirm_window: Duration::from_millis(1500),
            debounce: Duration::from_millis(500),
            cooldown: Duration::from_millis(1200),
        }
    }
}

/// Board geometry and layout tuning.
#[derive(Debug, Clone)]
pub struct BoardConfig {
    /// The tutor's fixed x origin; the LLM is prompted to start here
    pub write_x: f64,
    /// The tutor's fixed y origin (top margin); `clear` resets the cursor here
    pub write_y: f64,
    /// Vertical budget before the layout auto-clears the board
    pub max_board_height: f64,
    /// Gap kept between student content and the tutor's next write
    pub margin_below_student: f64,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            write_x: 80.0,
            write_y: 140.0,
            max_board_height: 1960.0,
            margin_below_student: 40.0,
        }
    }
}

/// Adaptive LaTeX sizing bounds (target pixel heights for rendered math).
#[derive(Debug, Clone)]
pub struct LatexConfig {
    /// LaTeX renderer base URL (the MathJax microservice)
    pub render_url: String,
    pub target_height_px: f64,
    pub target_height_min_px: f64,
    pub target_height_max_px: f64,
}

impl Default for LatexConfig {
    fn default() -> Self {
        Self {
            render_url: "http://localhost:3001/mathjax".to_string(),
            target_height_px: 34.0,
            target_height_min_px: 28.0,
            target_height_max_px: 44.0,
        }
    }
}

/// Server configuration
///
/// Contains everything needed to run the tutor gateway: bind address,
/// provider credentials, and the timing windows that shape the voice loop.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,
    /// CORS allowed origins (comma-separated, or "*" for all).
    /// None means same-origin only.
    pub cors_allowed_origins: Option<String>,

    // Provider credentials
    /// Anthropic API key (required)
    pub anthropic_api_key: String,
    /// LLM model identifier
    pub llm_model: String,
    /// Deepgram API key; STT is disabled for the session when absent
    pub deepgram_api_key: Option<String>,
    /// ElevenLabs API key; TTS yields no audio when absent
    pub elevenlabs_api_key: Option<String>,
    /// ElevenLabs voice identifier
    pub elevenlabs_voice_id: String,

    // Subsystem tuning
    pub echo: EchoConfig,
    pub board: BoardConfig,
    pub latex: LatexConfig,
    /// Coalesce consecutive final transcripts arriving within this window
    pub stt_merge_window: Duration,
    /// Silence required before a proactive board check may fire
    pub silence_threshold: Duration,
    /// Minimum spacing between proactive board checks
    pub min_proactive_interval: Duration,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Fails only when `ANTHROPIC_API_KEY` is missing, empty, or an obvious
    /// placeholder; everything else falls back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let anthropic_api_key = required_key("ANTHROPIC_API_KEY")?;

        Ok(Self {
            host: env_string("HOST", "0.0.0.0"),
            port: env_parse("PORT", 8000u16)?,
            cors_allowed_origins: env_opt("CORS_ALLOWED_ORIGINS"),
            anthropic_api_key,
            llm_model: env_string("LLM_MODEL", "claude-haiku-4-5-20251001"),
            deepgram_api_key: env_opt("DEEPGRAM_API_KEY"),
            elevenlabs_api_key: env_opt("ELEVENLABS_API_KEY"),
            // Rachel
            elevenlabs_voice_id: env_string("ELEVENLABS_VOICE_ID", "21m00Tcm4TlvDq8ikWAM"),
            echo: EchoConfig {
                start_guard: env_secs("BARGE_START_GUARD_SEC", 0.25)?,
                confirm_window: env_secs("AUTO_BARGE_CONFIRM_WINDOW_SEC", 1.5)?,
                debounce: env_secs("AUTO_BARGE_DEBOUNCE_SEC", 0.5)?,
                cooldown: env_secs("ECHO_COOLDOWN_SEC", 1.2)?,
            },
            board: BoardConfig {
                write_x: env_parse("BOARD_WRITE_X", 80.0f64)?,
                write_y: env_parse("BOARD_WRITE_Y", 140.0f64)?,
                max_board_height: env_parse("MAX_BOARD_HEIGHT", 1960.0f64)?,
                margin_below_student: env_parse("MARGIN_BELOW_STUDENT", 40.0f64)?,
            },
            latex: LatexConfig {
                render_url: env_string("LATEX_RENDER_URL", "http://localhost:3001/mathjax"),
                target_height_px: env_parse("LATEX_TARGET_HEIGHT_PX", 34.0f64)?,
                target_height_min_px: env_parse("LATEX_TARGET_HEIGHT_MIN_PX", 28.0f64)?,
                target_height_max_px: env_parse("LATEX_TARGET_HEIGHT_MAX_PX", 44.0f64)?,
            },
            stt_merge_window: env_secs("STT_MERGE_WINDOW_SEC", 0.8)?,
            silence_threshold: env_secs("SILENCE_THRESHOLD_SEC", 6.0)?,
            min_proactive_interval: env_secs("MIN_PROACTIVE_INTERVAL_SEC", 15.0)?,
        })
    }

    /// Bind address in `host:port` form.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    /// A config suitable for tests: no real credentials, all defaults.
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            cors_allowed_origins: None,
            anthropic_api_key: String::new(),
            llm_model: "claude-haiku-4-5-20251001".to_string(),
            deepgram_api_key: None,
            elevenlabs_api_key: None,
            elevenlabs_voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(),
            echo: EchoConfig::default(),
            board: BoardConfig::default(),
            latex: LatexConfig::default(),
            stt_merge_window: Duration::from_millis(800),
            silence_threshold: Duration::from_secs(6),
            min_proactive_interval: Duration::from_secs(15),
        }
    }
}

fn env_opt(name: &'static str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_string(name: &'static str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env_opt(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidVar { name, value: raw }),
    }
}

fn env_secs(name: &'static str, default: f64) -> Result<Duration, ConfigError> {
    let secs: f64 = env_parse(name, default)?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(ConfigError::InvalidVar {
            name,
            value: secs.to_string(),
        });
    }
    Ok(Duration::from_secs_f64(secs))
}

fn required_key(name: &'static str) -> Result<String, ConfigError> {
    let value = env_opt(name).ok_or(ConfigError::MissingVar(name))?;
    let upper = value.to_uppercase();
    if upper.starts_with("YOUR_") || upper == "CHANGE_ME" || upper == "REPLACE_ME" {
        return Err(ConfigError::MissingVar(name));
    }
    Ok(value)
}
