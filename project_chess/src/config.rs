use std::path::Path;

use serde::Deserialize;

use coordinator::CoordinatorConfig;
use net::rate_limiter::RateLimitConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetSection {
    pub ws_addr: String,
}

impl Default for NetSection {
    fn default() -> Self {
        Self {
            ws_addr: "0.0.0.0:4100".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TickSection {
    pub tps: u32,
}

impl Default for TickSection {
    fn default() -> Self {
        Self { tps: 20 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GameSection {
    pub time_budget_secs: u64,
    pub initial_lifelines: u8,
    pub countdown_secs: u64,
    pub clock_tolerance_secs: u64,
    pub clock_sync_secs: u64,
    pub finalize_grace_ms: u64,
}

impl Default for GameSection {
    fn default() -> Self {
        Self {
            time_budget_secs: 900, // 15 minutes per side
            initial_lifelines: 3,
            countdown_secs: 30,
            clock_tolerance_secs: 60,
            clock_sync_secs: 5,
            finalize_grace_ms: 1500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub signature_freshness_secs: u64,
    pub future_skew_secs: u64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            signature_freshness_secs: 300,
            future_skew_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub path: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: "data/games.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceSection {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for PersistenceSection {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    pub max_connections_total: usize,
    pub max_connections_per_ip: usize,
    pub max_commands_per_second: u32,
    pub max_input_length: usize,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            max_connections_total: 1000,
            max_connections_per_ip: 8,
            max_commands_per_second: 20,
            max_input_length: 4096,
        }
    }
}

/// Top-level chess server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub net: NetSection,
    pub tick: TickSection,
    pub game: GameSection,
    pub auth: AuthSection,
    pub database: DatabaseSection,
    pub persistence: PersistenceSection,
    pub security: SecuritySection,
}

impl ServerConfig {
    /// Load configuration from an optional TOML file path.
    pub fn load(config_path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        let config = match config_path {
            Some(path) if Path::new(path).exists() => {
                let content = std::fs::read_to_string(path)?;
                toml::from_str(&content)?
            }
            _ => Self::default(),
        };
        Ok(config)
    }

    /// Convert the game, auth and persistence sections into the
    /// coordinator's settings.
    pub fn to_coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            time_budget_secs: self.game.time_budget_secs,
            initial_lifelines: self.game.initial_lifelines,
            countdown_secs: self.game.countdown_secs,
            clock_tolerance_secs: self.game.clock_tolerance_secs,
            clock_sync_secs: self.game.clock_sync_secs,
            finalize_grace_ms: self.game.finalize_grace_ms,
            signature_freshness_secs: self.auth.signature_freshness_secs,
            future_skew_secs: self.auth.future_skew_secs,
            persist_max_attempts: self.persistence.max_attempts,
            persist_backoff_ms: self.persistence.backoff_ms,
            persist_backoff_max_ms: self.persistence.backoff_max_ms,
        }
    }

    pub fn to_rate_limits(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_connections_total: self.security.max_connections_total,
            max_connections_per_ip: self.security.max_connections_per_ip,
            max_commands_per_second: self.security.max_commands_per_second,
            max_input_length: self.security.max_input_length,
        }
    }
}

/// Parse CLI arguments and load config.
/// Supports: --config <path>
pub fn parse_cli_args() -> ServerConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path: Option<&str> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                if let Some(val) = args.get(i + 1) {
                    config_path = Some(val.as_str());
                    i += 2;
                } else {
                    eprintln!("--config requires a path argument");
                    std::process::exit(1);
                }
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                std::process::exit(1);
            }
        }
    }

    match ServerConfig::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    }
}
