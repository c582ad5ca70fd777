use anyhow::{Context, Result};
use std::{path::PathBuf, time::Duration};

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Reproducción
    pub default_volume: u16,
    pub idle_timeout: Duration,

    // Mensaje de estado
    pub status_refresh_interval: Duration,
    pub status_history_window: u8,

    // Prompts interactivos
    pub selection_timeout: Duration,
    pub confirmation_timeout: Duration,

    // Límites
    pub control_rate_limit: u32, // Reacciones por minuto por usuario y control

    // Paths
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN no definido")?,
            application_id: std::env::var("APPLICATION_ID")
                .context("APPLICATION_ID no definido")?
                .parse()?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Reproducción
            default_volume: std::env::var("DEFAULT_VOLUME")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,
            idle_timeout: env_duration("IDLE_TIMEOUT", "5m")?,

            // Mensaje de estado
            status_refresh_interval: env_duration("STATUS_REFRESH_INTERVAL", "10s")?,
            status_history_window: std::env::var("STATUS_HISTORY_WINDOW")
                .unwrap_or_else(|_| "7".to_string())
                .parse()?,

            // Prompts
            selection_timeout: env_duration("SELECTION_TIMEOUT", "60s")?,
            confirmation_timeout: env_duration("CONFIRMATION_TIMEOUT", "30s")?,

            // Límites
            control_rate_limit: std::env::var("CONTROL_RATE_LIMIT")
                .unwrap_or_else(|_| "20".to_string())
                .parse()?,

            // Paths
            data_dir: std::env::var("DATA_DIR")
                .unwrap_or_else(|_| "/app/data".to_string())
                .into(),
        };

        std::fs::create_dir_all(&config.data_dir)?;

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Default volume must be between 0 and 100 (higher values need confirmation at runtime)
    /// - Timers must be non-zero
    /// - The status freshness window must look at one message at least
    /// - The control rate limit must allow one reaction per minute at least
    pub fn validate(&self) -> Result<()> {
        if self.default_volume > 100 {
            anyhow::bail!("Default volume must be between 0 and 100, got: {}", self.default_volume);
        }

        if self.idle_timeout.is_zero() {
            anyhow::bail!("Idle timeout must be greater than 0");
        }

        if self.status_refresh_interval.is_zero() {
            anyhow::bail!("Status refresh interval must be greater than 0");
        }

        if self.status_history_window == 0 {
            anyhow::bail!("Status history window must be greater than 0");
        }

        if self.selection_timeout.is_zero() || self.confirmation_timeout.is_zero() {
            anyhow::bail!("Prompt timeouts must be greater than 0");
        }

        if self.control_rate_limit == 0 {
            anyhow::bail!("Control rate limit must be greater than 0");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Player: {}% vol, idle timeout {}\n  \
            Status: refresh {}, freshness window {} msgs\n  \
            Prompts: selection {}, confirmation {}\n  \
            Limits: {}/min per control",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.default_volume,
            humantime::format_duration(self.idle_timeout),
            humantime::format_duration(self.status_refresh_interval),
            self.status_history_window,
            humantime::format_duration(self.selection_timeout),
            humantime::format_duration(self.confirmation_timeout),
            self.control_rate_limit,
        )
    }

    pub fn player_settings(&self) -> PlayerSettings {
        PlayerSettings {
            default_volume: self.default_volume,
            idle_timeout: self.idle_timeout,
            refresh_interval: self.status_refresh_interval,
            history_window: self.status_history_window,
            control_rate_limit: self.control_rate_limit,
        }
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            default_volume: 50,
            idle_timeout: Duration::from_secs(300),

            status_refresh_interval: Duration::from_secs(10),
            status_history_window: 7,

            selection_timeout: Duration::from_secs(60),
            confirmation_timeout: Duration::from_secs(30),

            control_rate_limit: 20,

            data_dir: "/app/data".into(),
        }
    }
}

/// Tiempos y límites que necesita cada sesión de reproducción.
#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub default_volume: u16,
    pub idle_timeout: Duration,
    pub refresh_interval: Duration,
    pub history_window: u8,
    pub control_rate_limit: u32,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Config::default().player_settings()
    }
}

fn env_duration(key: &str, default: &str) -> Result<Duration> {
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    humantime::parse_duration(raw.trim()).with_context(|| format!("{key} inválido: {raw}"))
}
