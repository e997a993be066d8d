use serde::Deserialize;

use clash_core::game_trait::BotSettings;

/// Top-level server configuration, loaded from `clash.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub auth: AuthFileConfig,
    pub limits: LimitsConfig,
    pub rooms: RoomsConfig,
    pub matchmaking: MatchmakingConfig,
    pub bot: BotConfig,
    pub chat: ChatConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            auth: AuthFileConfig::default(),
            limits: LimitsConfig::default(),
            rooms: RoomsConfig::default(),
            matchmaking: MatchmakingConfig::default(),
            bot: BotConfig::default(),
            chat: ChatConfig::default(),
        }
    }
}

/// Auth section of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthFileConfig {
    /// Guards `/api/v1/*` when set.
    pub bearer_token: Option<String>,
}

/// Infrastructure limits (connection caps, buffer sizes, rate limits).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_ws_connections: usize,
    /// Maximum concurrent WebSocket connections per IP address.
    pub max_ws_per_ip: usize,
    pub ws_rate_limit_per_sec: f64,
    /// Outbound queue depth per connection.
    pub connection_message_buffer: usize,
    /// API endpoint rate limit: max burst tokens per IP.
    pub api_rate_limit_burst: usize,
    /// API endpoint rate limit: token refill rate (requests per second) per IP.
    pub api_rate_limit_per_sec: f64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 200,
            max_ws_per_ip: 10,
            ws_rate_limit_per_sec: 30.0,
            connection_message_buffer: 256,
            api_rate_limit_burst: 20,
            api_rate_limit_per_sec: 2.0,
        }
    }
}

/// Room lifecycle configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoomsConfig {
    /// Rooms still waiting for a second participant are dropped after this.
    pub idle_timeout_secs: u64,
    pub finished_retention_secs: u64,
    pub disconnect_grace_secs: u64,
    pub sweep_interval_secs: u64,
    /// Swap seats on reset so the other participant moves first.
    pub alternate_first_mover: bool,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 600,
            finished_retention_secs: 120,
            disconnect_grace_secs: 30,
            sweep_interval_secs: 15,
            alternate_first_mover: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchmakingConfig {
    pub request_ttl_secs: u64,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            request_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub medium_depth: u8,
    pub hard_depth: u8,
    /// Pause before a bot reply is applied.
    pub move_delay_ms: u64,
    /// Fixed RNG seed for reproducible bots. Unset in production.
    pub seed: Option<u64>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            medium_depth: 2,
            hard_depth: 3,
            move_delay_ms: 300,
            seed: None,
        }
    }
}

impl BotConfig {
    pub fn settings(&self) -> BotSettings {
        BotSettings {
            medium_depth: self.medium_depth,
            hard_depth: self.hard_depth,
            seed: self.seed,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub max_message_len: usize,
    pub history_page_limit: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_len: 2000,
            history_page_limit: 200,
        }
    }
}

impl ServerConfig {
    /// Check the configuration, describing the first problem found.
    pub fn check(&self) -> Result<(), String> {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!(
                "listen_addr {} is not a valid socket address",
                self.listen_addr
            ));
        }
        let positive = [
            ("limits.max_ws_connections", self.limits.max_ws_connections),
            ("limits.max_ws_per_ip", self.limits.max_ws_per_ip),
            (
                "limits.connection_message_buffer",
                self.limits.connection_message_buffer,
            ),
            ("limits.api_rate_limit_burst", self.limits.api_rate_limit_burst),
            ("chat.max_message_len", self.chat.max_message_len),
            ("chat.history_page_limit", self.chat.history_page_limit),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(format!("{name} must be > 0"));
        }
        if self.limits.ws_rate_limit_per_sec <= 0.0 {
            return Err("limits.ws_rate_limit_per_sec must be > 0".to_string());
        }
        if self.limits.api_rate_limit_per_sec <= 0.0 {
            return Err("limits.api_rate_limit_per_sec must be > 0".to_string());
        }
        if self.rooms.idle_timeout_secs == 0 || self.rooms.sweep_interval_secs == 0 {
            return Err("rooms.idle_timeout_secs and rooms.sweep_interval_secs must be > 0".into());
        }
        if self.matchmaking.request_ttl_secs == 0 {
            return Err("matchmaking.request_ttl_secs must be > 0".to_string());
        }
        if self.bot.medium_depth == 0 || self.bot.hard_depth == 0 {
            return Err("bot search depths must be > 0".to_string());
        }
        Ok(())
    }

    /// Validate configuration, exiting on fatal problems and logging warnings.
    pub fn validate(&self) {
        if let Err(problem) = self.check() {
            tracing::error!("{problem}");
            std::process::exit(1);
        }
        if self.auth.bearer_token.is_some() {
            tracing::warn!(
                "bearer_token is set in config file, use CLASH_API_TOKEN env var in production"
            );
        }
        if self.rooms.disconnect_grace_secs == 0 {
            tracing::warn!("rooms.disconnect_grace_secs is 0, any dropped connection forfeits");
        }
    }

    /// Load config from `clash.toml` if it exists, then apply env var overrides.
    pub fn load() -> Self {
        let mut config = match std::fs::read_to_string("clash.toml") {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from clash.toml");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("Failed to parse clash.toml: {e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!("No clash.toml found, using defaults");
                ServerConfig::default()
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Apply `CLASH_*` overrides from a variable lookup.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = var("CLASH_LISTEN_ADDR")
            && !addr.is_empty()
        {
            self.listen_addr = addr;
        }
        if let Some(token) = var("CLASH_API_TOKEN")
            && !token.is_empty()
        {
            self.auth.bearer_token = Some(token);
        }
        if let Some(val) = var("CLASH_MAX_WS_CONNECTIONS")
            && let Ok(n) = val.parse::<usize>()
        {
            self.limits.max_ws_connections = n;
        }
        if let Some(val) = var("CLASH_WS_RATE_LIMIT")
            && let Ok(n) = val.parse::<f64>()
        {
            self.limits.ws_rate_limit_per_sec = n;
        }
        if let Some(val) = var("CLASH_IDLE_ROOM_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            self.rooms.idle_timeout_secs = n;
        }
        if let Some(val) = var("CLASH_DISCONNECT_GRACE_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            self.rooms.disconnect_grace_secs = n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.listen_addr, "0.0.0.0:8080");
        assert!(cfg.auth.bearer_token.is_none());
        assert_eq!(cfg.rooms.disconnect_grace_secs, 30);
        assert!(cfg.rooms.alternate_first_mover);
        assert_eq!(cfg.matchmaking.request_ttl_secs, 300);
        assert_eq!(cfg.bot.hard_depth, 3);
        assert!(cfg.check().is_ok());
    }

    #[test]
    fn parse_sections_toml() {
        let toml_str = r#"
listen_addr = "127.0.0.1:9090"

[auth]
bearer_token = "secret123"

[limits]
max_ws_connections = 500
ws_rate_limit_per_sec = 100.0

[rooms]
disconnect_grace_secs = 5
alternate_first_mover = false

[bot]
hard_depth = 4
seed = 9
"#;
        let cfg: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.listen_addr, "127.0.0.1:9090");
        assert_eq!(cfg.auth.bearer_token.as_deref(), Some("secret123"));
        assert_eq!(cfg.limits.max_ws_connections, 500);
        assert!((cfg.limits.ws_rate_limit_per_sec - 100.0).abs() < f64::EPSILON);
        assert_eq!(cfg.limits.max_ws_per_ip, 10);
        assert_eq!(cfg.rooms.disconnect_grace_secs, 5);
        assert!(!cfg.rooms.alternate_first_mover);
        assert_eq!(cfg.rooms.idle_timeout_secs, 600);
        let bot = cfg.bot.settings();
        assert_eq!(bot.hard_depth, 4);
        assert_eq!(bot.medium_depth, 2);
        assert_eq!(bot.seed, Some(9));
    }

    #[test]
    fn check_rejects_bad_values() {
        let cfg = ServerConfig {
            listen_addr: "not-an-address".to_string(),
            ..ServerConfig::default()
        };
        assert!(cfg.check().unwrap_err().contains("listen_addr"));

        let mut cfg = ServerConfig::default();
        cfg.limits.connection_message_buffer = 0;
        assert!(cfg.check().unwrap_err().contains("connection_message_buffer"));

        let mut cfg = ServerConfig::default();
        cfg.limits.ws_rate_limit_per_sec = 0.0;
        assert!(cfg.check().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = ServerConfig::default();
        cfg.apply_env(|key| match key {
            "CLASH_LISTEN_ADDR" => Some("127.0.0.1:1234".into()),
            "CLASH_API_TOKEN" => Some("tok".into()),
            "CLASH_DISCONNECT_GRACE_SECS" => Some("7".into()),
            "CLASH_WS_RATE_LIMIT" => Some("not a number".into()),
            _ => None,
        });
        assert_eq!(cfg.listen_addr, "127.0.0.1:1234");
        assert_eq!(cfg.auth.bearer_token.as_deref(), Some("tok"));
        assert_eq!(cfg.rooms.disconnect_grace_secs, 7);
        assert!((cfg.limits.ws_rate_limit_per_sec - 30.0).abs() < f64::EPSILON);
    }
}
