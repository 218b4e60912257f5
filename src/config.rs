use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use thiserror::Error;
use tracing_appender::rolling::Rotation;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// Root directory for the filesystem blob store
    #[serde(default = "default_blob_root")]
    pub blob_root: String,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub withdrawal: WithdrawalConfig,
    #[serde(default)]
    pub assignment_policy: AssignmentPolicy,
    #[serde(default)]
    pub referral_trigger: ReferralTrigger,
    /// PostgreSQL connection URL; in-memory store when absent
    #[serde(default)]
    pub postgres_url: Option<String>,
}

fn default_blob_root() -> String {
    "./data/blobs".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "credit_ledger.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            blob_root: default_blob_root(),
            ledger: LedgerConfig::default(),
            withdrawal: WithdrawalConfig::default(),
            assignment_policy: AssignmentPolicy::default(),
            referral_trigger: ReferralTrigger::default(),
            postgres_url: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LedgerConfig {
    /// External currency units per credit
    pub credit_rate: Decimal,
    /// Credits granted at signup
    pub signup_bonus: Decimal,
    /// Credits granted to a referrer when a referral is awarded
    pub referral_bonus: Decimal,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            credit_rate: Decimal::from(150),
            signup_bonus: Decimal::new(15, 1),
            referral_bonus: Decimal::ONE,
        }
    }
}

/// Allowed window for a single withdrawal, in external currency
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WithdrawalConfig {
    pub min: Decimal,
    pub max: Decimal,
}

impl Default for WithdrawalConfig {
    fn default() -> Self {
        Self {
            min: Decimal::from(1500),
            max: Decimal::from(15000),
        }
    }
}

/// How many collaborators may accept the same request
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentPolicy {
    /// Every assigned collaborator may accept (parallel work)
    #[default]
    AllowMultiple,
    /// The first acceptance claims the request; later ones conflict
    ClaimExclusive,
}

/// Which event awards a pending referral bonus
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReferralTrigger {
    /// Only an explicit `ReferralLedger::award` call
    #[default]
    Manual,
    /// Approval of the referred account's first deposit
    FirstApprovedDeposit,
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Io {
            path: config_path.clone(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Log file rotation: `hourly`, `daily` or `never`
    pub fn log_rotation(&self) -> Result<Rotation, ConfigError> {
        match self.rotation.as_str() {
            "hourly" => Ok(Rotation::HOURLY),
            "daily" => Ok(Rotation::DAILY),
            "never" => Ok(Rotation::NEVER),
            other => Err(ConfigError::Invalid(format!("unknown log rotation {}", other))),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.log_rotation()?;
        let ledger = &self.ledger;
        if ledger.credit_rate <= Decimal::ZERO {
            return Err(ConfigError::Invalid("ledger.credit_rate must be positive".into()));
        }
        if ledger.signup_bonus.is_sign_negative() {
            return Err(ConfigError::Invalid("ledger.signup_bonus must not be negative".into()));
        }
        if ledger.referral_bonus <= Decimal::ZERO {
            return Err(ConfigError::Invalid("ledger.referral_bonus must be positive".into()));
        }
        let w = &self.withdrawal;
        if w.min <= Decimal::ZERO || w.max < w.min {
            return Err(ConfigError::Invalid(format!(
                "withdrawal window [{}, {}] is empty or non-positive",
                w.min, w.max
            )));
        }
        Ok(())
    }
}
