use serde;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub app_port: u16,
    pub app_host: String,
    pub shared_secret: String,
    /// Callers allowed on the `/admin` surface; everyone else gets a 403.
    pub admin_callers: Vec<String>,
    pub queue: QueueSettings,
    pub codegen: CodegenSettings,
    pub deployer: DeployerSettings,
    pub stream: StreamSettings,
    pub webhook: WebhookSettings,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database_name: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct QueueSettings {
    pub poll_interval_secs: u64,
    pub lease_secs: u64,
    pub max_attempts: i32,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
    pub executors: usize,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CodegenSettings {
    pub command: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DeployerSettings {
    pub command: String,
    pub timeout_secs: u64,
    pub workspace_root: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct StreamSettings {
    pub max_connections_per_key: i64,
    pub retry_after_secs: u64,
    pub idle_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct WebhookSettings {
    pub tick_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
    pub request_timeout_secs: u64,
}

impl DatabaseSettings {
    // Connection string: postgresql://<username>:<password>@<host>:<port>/<database_name>
    pub fn connection_string(&self) -> String {
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name,
        )
    }

    pub fn connection_string_without_db(&self) -> String {
        format!(
            "postgresql://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port,
        )
    }
}

impl RedisSettings {
    pub fn connection_string(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    dotenvy::dotenv().ok();

    let mut settings = config::Config::default();

    // Configuration file named `configuration` with a .yaml/.json/.toml extension
    settings.merge(config::File::with_name("configuration"))?;

    let mut config: Settings = settings.try_deserialize()?;

    // The shared secret never lives in the configuration file
    if let Ok(secret) = std::env::var("SHARED_SECRET") {
        config.shared_secret = secret;
    }

    Ok(config)
}
