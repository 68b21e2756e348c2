//! Configuration loader and validator for the timesheet portal backend.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub auth: Auth,
    pub zoho: Zoho,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub bind_addr: String,
    pub data_dir: String,
}

/// Secrets guarding the operational endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Auth {
    /// Bearer token expected on `POST /admin/reconcile`.
    pub cron_secret: String,
    /// Bearer token expected on the CRM webhook endpoints.
    pub webhook_secret: String,
}

/// Zoho CRM API settings and module mappings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Zoho {
    pub accounts_base: String,
    pub api_base: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub timeout_seconds: u64,
    pub modules: Modules,
}

/// CRM module (API name) mapping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Modules {
    /// Parent module holding one record per submitted timesheet.
    pub timesheet: String,
    /// Junction module linking a timesheet record to one painter.
    pub junction: String,
    /// Deal/job module mirrored into the local project table.
    pub project: String,
    /// Junction module linking portal users to projects they may see.
    pub connection: String,
    /// Crew directory module.
    pub painter: String,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.bind_addr.trim().is_empty() {
        return Err(ConfigError::Invalid("app.bind_addr must be non-empty"));
    }
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    if cfg.auth.cron_secret.trim().is_empty() {
        return Err(ConfigError::Invalid("auth.cron_secret must be non-empty"));
    }
    if cfg.auth.webhook_secret.trim().is_empty() {
        return Err(ConfigError::Invalid("auth.webhook_secret must be non-empty"));
    }

    if cfg.zoho.accounts_base.trim().is_empty() {
        return Err(ConfigError::Invalid("zoho.accounts_base must be non-empty"));
    }
    if cfg.zoho.api_base.trim().is_empty() {
        return Err(ConfigError::Invalid("zoho.api_base must be non-empty"));
    }
    if cfg.zoho.client_id.trim().is_empty() {
        return Err(ConfigError::Invalid("zoho.client_id must be non-empty"));
    }
    if cfg.zoho.client_secret.trim().is_empty() {
        return Err(ConfigError::Invalid("zoho.client_secret must be non-empty"));
    }
    if cfg.zoho.refresh_token.trim().is_empty() {
        return Err(ConfigError::Invalid("zoho.refresh_token must be non-empty"));
    }
    if cfg.zoho.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("zoho.timeout_seconds must be > 0"));
    }

    let m = &cfg.zoho.modules;
    if m.timesheet.trim().is_empty() {
        return Err(ConfigError::Invalid("zoho.modules.timesheet must be non-empty"));
    }
    if m.junction.trim().is_empty() {
        return Err(ConfigError::Invalid("zoho.modules.junction must be non-empty"));
    }
    if m.project.trim().is_empty() {
        return Err(ConfigError::Invalid("zoho.modules.project must be non-empty"));
    }
    if m.connection.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "zoho.modules.connection must be non-empty",
        ));
    }
    if m.painter.trim().is_empty() {
        return Err(ConfigError::Invalid("zoho.modules.painter must be non-empty"));
    }

    Ok(())
}

/// Example YAML used by docs and tests.
pub fn example() -> &'static str {
    r#"app:
  bind_addr: "0.0.0.0:8080"
  data_dir: "./data"

auth:
  cron_secret: "CRON_SHARED_SECRET"
  webhook_secret: "WEBHOOK_SHARED_SECRET"

zoho:
  accounts_base: "https://accounts.zoho.com"
  api_base: "https://www.zohoapis.com"
  client_id: "YOUR_ZOHO_CLIENT_ID"
  client_secret: "YOUR_ZOHO_CLIENT_SECRET"
  refresh_token: "YOUR_ZOHO_REFRESH_TOKEN"
  timeout_seconds: 10

  modules:
    timesheet: "Timesheets"
    junction: "Timesheets_X_Painters"
    project: "Deals"
    connection: "Portal_Users_X_Projects"
    painter: "Painters"
"#
}
