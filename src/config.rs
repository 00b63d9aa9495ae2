use serde::Deserialize;

/// Ten years.
pub const MAX_TOKEN_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub docker: DockerConfig,
    pub publishing: PublishingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared dashboard password. `None` means every protected route answers 500.
    pub password: Option<String>,
    /// HMAC secret for session tokens. Falls back to a development value when unset.
    pub jwt_secret: Option<String>,
    pub token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            password: None,
            jwt_secret: None,
            token_ttl_secs: 60 * 60 * 24 * 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Upper bound for the container list call; on expiry the list is empty.
    pub list_timeout_ms: u64,
    pub stop_timeout_secs: i32,
    pub restart_timeout_secs: i32,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            list_timeout_ms: 2000,
            stop_timeout_secs: 10,
            restart_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublishingConfig {
    /// Period of full snapshots on /ws/containers/stream (events push in between).
    pub containers_interval_ms: u64,
}

impl Default for PublishingConfig {
    fn default() -> Self {
        Self {
            containers_interval_ms: 2000,
        }
    }
}

impl AppConfig {
    /// Reads `$CONFIG_FILE` (default `config.toml`) if present, then applies env overrides.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let mut config: AppConfig = match std::fs::read_to_string(&path) {
            Ok(s) => toml::from_str(&s)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path, "No config file, using defaults");
                AppConfig::default()
            }
            Err(e) => return Err(e.into()),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate config from a string (e.g. for tests). No env overrides.
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `PASSWORD`, `JWT_SECRET`, `PORT` and `HOST` from `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(password) = lookup("PASSWORD").filter(|p| !p.is_empty()) {
            self.auth.password = Some(password);
        }
        if let Some(secret) = lookup("JWT_SECRET").filter(|s| !s.is_empty()) {
            self.auth.jwt_secret = Some(secret);
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| anyhow::anyhow!("PORT must be a port number, got {:?}: {}", port, e))?;
        }
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(!self.server.host.is_empty(), "server.host must be non-empty");
        anyhow::ensure!(
            (1..=MAX_TOKEN_TTL_SECS).contains(&self.auth.token_ttl_secs),
            "auth.token_ttl_secs must be between 1 and {}, got {}",
            MAX_TOKEN_TTL_SECS,
            self.auth.token_ttl_secs
        );
        anyhow::ensure!(
            self.docker.list_timeout_ms > 0,
            "docker.list_timeout_ms must be > 0, got {}",
            self.docker.list_timeout_ms
        );
        anyhow::ensure!(
            self.docker.stop_timeout_secs >= 0,
            "docker.stop_timeout_secs must be >= 0, got {}",
            self.docker.stop_timeout_secs
        );
        anyhow::ensure!(
            self.docker.restart_timeout_secs >= 0,
            "docker.restart_timeout_secs must be >= 0, got {}",
            self.docker.restart_timeout_secs
        );
        anyhow::ensure!(
            self.publishing.containers_interval_ms > 0,
            "publishing.containers_interval_ms must be > 0, got {}",
            self.publishing.containers_interval_ms
        );
        Ok(())
    }
}
