use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::workflow::AdvisoryMode;

/// Main configuration structure for the loan workflow engine
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoanWorkflowConfig {
    /// Advisory store failure handling
    pub advisory: AdvisoryConfig,
    /// Status write cascade settings
    pub persistence: PersistenceConfig,
    /// Workflow history settings
    pub history: HistoryConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
    /// Database settings (optional)
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdvisoryConfig {
    /// `degrade` continues past intent/audit outages, `strict` refuses
    pub mode: AdvisoryMode,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PersistenceConfig {
    /// Allow the last-resort strategy that inserts a replacement record
    pub enable_record_replacement: bool,
    /// Prefix for application numbers minted on replacement records
    pub application_number_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HistoryConfig {
    /// Maximum steps returned by history queries; unset returns all
    pub default_limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level
    pub log_level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL (SQLite file path or connection string)
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Enable automatic migrations
    pub auto_migrate: bool,
}

impl Default for LoanWorkflowConfig {
    fn default() -> Self {
        Self {
            advisory: AdvisoryConfig {
                mode: AdvisoryMode::Degrade,
            },
            persistence: PersistenceConfig {
                enable_record_replacement: true,
                application_number_prefix: "LA".to_string(),
            },
            history: HistoryConfig {
                default_limit: None,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json: true,
            },
            database: Some(DatabaseConfig {
                url: ".loan-workflow/loan-workflow.db".to_string(),
                max_connections: 10,
                auto_migrate: true,
            }),
        }
    }
}

impl LoanWorkflowConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (loan-workflow.toml, .loan-workflow-rc)
    /// 3. Environment variables (prefixed with LOAN_WORKFLOW_)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Same as `load`, resolving the configuration files relative to `dir`
    pub fn load_from(dir: &Path) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        let toml_path = dir.join("loan-workflow.toml");
        if toml_path.exists() {
            builder = builder.add_source(File::from(toml_path));
        }

        let rc_path = dir.join(".loan-workflow-rc");
        if rc_path.exists() {
            builder = builder.add_source(File::from(rc_path).format(config::FileFormat::Toml));
        }

        // Double underscore separates sections so field names keep their own underscores
        builder = builder.add_source(
            Environment::with_prefix("LOAN_WORKFLOW")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let loan_workflow_config: LoanWorkflowConfig = config.try_deserialize()?;
        Ok(loan_workflow_config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<LoanWorkflowConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        // Load .env file first
        let _ = LoanWorkflowConfig::load_env_file();
        LoanWorkflowConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static LoanWorkflowConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

/// Initialize configuration (called at startup)
pub fn init_config() -> Result<()> {
    let _config = config()?;
    tracing::info!("Configuration loaded successfully");
    Ok(())
}
