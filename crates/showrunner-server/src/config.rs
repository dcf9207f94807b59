use std::path::PathBuf;

use serde::Deserialize;

/// Host-side configuration, loaded from `showrunner.toml` with environment
/// overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    /// Game definition file, TOML unless `--json` is passed.
    pub game: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            client_id: "showrunner".to_string(),
            game: PathBuf::from("game.toml"),
        }
    }
}

impl ServerConfig {
    /// Load from `path` if it exists, then apply env var overrides.
    pub fn load(path: &std::path::Path) -> Self {
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!(path = %path.display(), "loaded server configuration");
                    cfg
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        "failed to parse config: {e}, using defaults"
                    );
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "no config file, using defaults");
                ServerConfig::default()
            },
        };

        if let Ok(host) = std::env::var("SHOWRUNNER_BROKER_HOST")
            && !host.is_empty()
        {
            config.broker_host = host;
        }
        if let Ok(port) = std::env::var("SHOWRUNNER_BROKER_PORT")
            && let Ok(port) = port.parse::<u16>()
        {
            config.broker_port = port;
        }
        if let Ok(id) = std::env::var("SHOWRUNNER_CLIENT_ID")
            && !id.is_empty()
        {
            config.client_id = id;
        }
        if let Ok(game) = std::env::var("SHOWRUNNER_GAME")
            && !game.is_empty()
        {
            config.game = PathBuf::from(game);
        }

        config
    }

    /// Validate, exiting with a diagnostic on fatal problems.
    pub fn validate(&self) {
        if self.broker_host.is_empty() {
            tracing::error!("broker_host must not be empty");
            std::process::exit(1);
        }
        if self.broker_port == 0 {
            tracing::error!("broker_port must be > 0");
            std::process::exit(1);
        }
        if self.client_id.is_empty() {
            tracing::error!("client_id must not be empty");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.broker_host, "localhost");
        assert_eq!(cfg.broker_port, 1883);
        assert_eq!(cfg.client_id, "showrunner");
        assert_eq!(cfg.game, PathBuf::from("game.toml"));
    }

    #[test]
    fn parse_minimal_toml() {
        let toml_str = r#"
broker_host = "broker.local"
broker_port = 8883
game = "rooms/houdini.toml"
"#;
        let cfg: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.broker_host, "broker.local");
        assert_eq!(cfg.broker_port, 8883);
        assert_eq!(cfg.client_id, "showrunner");
        assert_eq!(cfg.game, PathBuf::from("rooms/houdini.toml"));
    }

    #[test]
    fn missing_fields_use_defaults() {
        let cfg: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.broker_port, 1883);
    }
}
