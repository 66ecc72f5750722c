use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the API listens on
    pub bind_addr: SocketAddr,
    /// Robot identifier used in logs and snapshots
    pub robot_name: String,
    /// Base URL of the safety service. Unset means no safety service.
    pub safety_url: Option<String>,
    /// Timeout for each safety service call
    pub safety_timeout: Duration,
    /// How long a standalone prepare waits before the robot is sent home
    pub prepare_timeout: Duration,
    /// Duration of each simulated robot task
    pub sim_task_delay: Duration,
    /// Buffered updates per subscriber before it starts lagging
    pub update_capacity: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::load()
    }

    fn load() -> anyhow::Result<Self> {
        let safety_url = std::env::var("ROBOTMX_SAFETY_URL")
            .ok()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());

        Ok(Self {
            bind_addr: env_parse("ROBOTMX_BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8090)))?,
            robot_name: env_str("ROBOTMX_ROBOT_NAME", "ROBOT_MX"),
            safety_url,
            safety_timeout: Duration::from_secs(env_parse("ROBOTMX_SAFETY_TIMEOUT_SECS", 120)?),
            prepare_timeout: Duration::from_secs(env_parse("ROBOTMX_PREPARE_TIMEOUT_SECS", 120)?),
            sim_task_delay: Duration::from_millis(env_parse("ROBOTMX_SIM_TASK_DELAY_MS", 500)?),
            update_capacity: env_parse("ROBOTMX_UPDATE_CAPACITY", 256)?,
        })
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}
