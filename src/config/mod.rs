use std::env;

/// Runtime configuration, loaded once at startup. Every field has a default
/// so the gateway starts in a bare dev environment.
#[derive(Clone, Debug)]
pub struct Config {
    pub jwt_secret: String,
    pub host: String,
    pub port: u16,

    pub rabbit_user: String,
    pub rabbit_pass: String,
    pub rabbit_host: String,
    pub rabbit_port: u16,
    pub rabbit_vhost: String,

    // Reserved endpoints provisioned alongside the gateway; nothing in the
    // gateway opens these connections today.
    pub db_host: String,
    pub db_port: u16,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,
    pub redis_host: String,
    pub redis_port: u16,

    pub cors_origins: Vec<String>,
    pub is_production: bool,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Config {
            jwt_secret: env_or("JWT_SECRET", "dev_secret_key_change_in_production"),
            host: env_or("SERVER_HOST", "0.0.0.0"),
            port: env_or("SERVER_PORT", "8004").parse().unwrap_or(8004),

            rabbit_user: env_or("SOCKET_RABBIT_USER", "guest"),
            rabbit_pass: env_or("SOCKET_RABBIT_PASS", "guest"),
            rabbit_host: env_or("RABBIT_HOST", "rabbitmq-host"),
            rabbit_port: env_or("RABBIT_PORT", "5672").parse().unwrap_or(5672),
            rabbit_vhost: env_or("RABBIT_VHOST", "/"),

            db_host: env_or("DB_HOST", "swecc-db-instance"),
            db_port: env_or("DB_PORT", "5432").parse().unwrap_or(5432),
            db_name: env_or("DB_NAME", "swecc"),
            db_user: env_or("DB_USER", "swecc"),
            db_password: env_or("DB_PASSWORD", "swecc"),
            redis_host: env_or("REDIS_HOST", "swecc-redis-instance"),
            redis_port: env_or("REDIS_PORT", "6379").parse().unwrap_or(6379),

            cors_origins: vec![
                "http://localhost:8000".to_string(),
                "http://localhost:80".to_string(),
                "http://localhost:3000".to_string(),
                "http://api.swecc.org".to_string(),
            ],
            is_production: env::var("APP_ENV").as_deref() == Ok("production"),
        }
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// AMQP URL with the vhost percent-encoded (the default vhost is `/`).
    pub fn amqp_url(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.rabbit_user,
            self.rabbit_pass,
            self.rabbit_host,
            self.rabbit_port,
            urlencoding::encode(&self.rabbit_vhost)
        )
    }
}
