use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Layered application configuration.
///
/// Sources, later overriding earlier: `config/default`, `config/{AGENTMESH_ENV}`,
/// `config/local`, then `AGENTMESH__*` environment variables.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSettings,
    pub retry: RetrySettings,
    pub engine: EngineSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentSettings {
    pub max_iterations: usize,
    /// Total token limit per invocation. Unlimited when absent.
    pub token_budget: Option<u64>,
    pub system_prompt: Option<String>,
    pub streaming: bool,
    pub parse_text_actions: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            token_budget: None,
            system_prompt: None,
            streaming: false,
            parse_text_actions: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrySettings {
    /// Consecutive provider-call retries allowed.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineSettings {
    pub max_concurrency: usize,
    /// Whole-run deadline. None means no deadline.
    pub timeout_ms: Option<u64>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            timeout_ms: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Fallback filter when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("AGENTMESH_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map AGENTMESH__ENGINE__MAX_CONCURRENCY=8 to engine.max_concurrency
            .add_source(Environment::with_prefix("AGENTMESH").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert_eq!(config.engine.max_concurrency, 4);
        assert!(config.engine.timeout_ms.is_none());
    }

    #[test]
    fn test_partial_source_keeps_defaults() {
        let config: AppConfig = Config::builder()
            .add_source(config::File::from_str(
                "[engine]\nmax_concurrency = 8\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.engine.max_concurrency, 8);
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.logging.level, "info");
    }
}
