use serde::Deserialize;
use std::{fs, path::Path, time::Duration};

use flex_client::{domain::IsoDuration, Credentials, SessionConfig};
use time::OffsetDateTime;

use crate::{
    error::ConfigurationError,
    flex::{ContextSettings, EmbeddingMode, ModelSettings},
    provision::{AssetSpec, SensorRole, SensorSpec},
    schedule::PollSettings,
};

pub const CONFIG_ENV: &str = "FLEX_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "flex-config.toml";

fn default_true() -> bool {
    true
}

fn default_api_path() -> String {
    "api/v3_0".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    pub host: String,
    #[serde(default = "default_true")]
    pub ssl: bool,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_api_path")]
    pub api_path: String,
    /// Version of the platform, used to pick where flex documents are stored.
    #[serde(default)]
    pub platform_version: Option<String>,
    #[serde(default)]
    pub embedding: Option<EmbeddingMode>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl PlatformConfig {
    pub fn embedding_mode(&self) -> EmbeddingMode {
        EmbeddingMode::resolve(self.embedding, self.platform_version.as_deref())
    }

    pub fn session_config(&self) -> Result<SessionConfig, ConfigurationError> {
        let credentials = match (&self.token, &self.email, &self.password) {
            (Some(token), _, _) => Credentials::Token(token.clone()),
            (None, Some(email), Some(password)) => Credentials::Password {
                email: email.clone(),
                password: password.clone(),
            },
            _ => {
                return Err(ConfigurationError::Invalid {
                    field: "platform",
                    reason: "either token or email and password must be set".to_string(),
                })
            }
        };

        let mut session = SessionConfig::new(self.host.clone(), credentials);
        session.ssl = self.ssl;
        session.api_path = self.api_path.clone();
        session.timeout = Duration::from_millis(self.request_timeout_ms);
        Ok(session)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetConfig {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub generic_asset_type_id: u64,
    pub account_id: u64,
}

impl From<&AssetConfig> for AssetSpec {
    fn from(cfg: &AssetConfig) -> Self {
        Self {
            name: cfg.name.clone(),
            latitude: cfg.latitude,
            longitude: cfg.longitude,
            generic_asset_type_id: cfg.generic_asset_type_id,
            account_id: cfg.account_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    pub name: String,
    pub unit: String,
}

fn sensor(name: &str, unit: &str) -> SensorConfig {
    SensorConfig {
        name: name.to_string(),
        unit: unit.to_string(),
    }
}

fn default_resolution() -> IsoDuration {
    IsoDuration::from_hours(1)
}

fn default_grid() -> SensorConfig {
    sensor("Grid Power", "kW")
}

fn default_power() -> SensorConfig {
    sensor("Battery Power", "kW")
}

fn default_buy_price() -> SensorConfig {
    sensor("Buy Price", "SEK/kWh")
}

fn default_sell_price() -> SensorConfig {
    sensor("Sell Price", "SEK/kWh")
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensorsConfig {
    #[serde(default = "default_resolution")]
    pub resolution: IsoDuration,
    #[serde(default = "default_grid")]
    pub grid: SensorConfig,
    #[serde(default = "default_power")]
    pub power: SensorConfig,
    #[serde(default = "default_buy_price")]
    pub buy_price: SensorConfig,
    #[serde(default = "default_sell_price")]
    pub sell_price: SensorConfig,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            resolution: default_resolution(),
            grid: default_grid(),
            power: default_power(),
            buy_price: default_buy_price(),
            sell_price: default_sell_price(),
        }
    }
}

impl SensorsConfig {
    pub fn get(&self, role: SensorRole) -> &SensorConfig {
        match role {
            SensorRole::Grid => &self.grid,
            SensorRole::Power => &self.power,
            SensorRole::BuyPrice => &self.buy_price,
            SensorRole::SellPrice => &self.sell_price,
        }
    }

    /// Sensor specs for all roles. Names must be unique within the asset.
    pub fn specs(&self) -> Result<Vec<SensorSpec>, ConfigurationError> {
        let specs: Vec<SensorSpec> = SensorRole::ALL
            .iter()
            .map(|role| {
                let cfg = self.get(*role);
                SensorSpec {
                    role: *role,
                    name: cfg.name.trim().to_string(),
                    unit: cfg.unit.clone(),
                    resolution: self.resolution,
                }
            })
            .collect();

        for (i, spec) in specs.iter().enumerate() {
            if spec.name.is_empty() {
                return Err(ConfigurationError::Invalid {
                    field: "sensors",
                    reason: format!("{} sensor has an empty name", spec.role.label()),
                });
            }
            if specs[..i].iter().any(|other| other.name == spec.name) {
                return Err(ConfigurationError::Invalid {
                    field: "sensors",
                    reason: format!("sensor name '{}' is used for more than one role", spec.name),
                });
            }
        }

        if self.resolution.is_zero() {
            return Err(ConfigurationError::Invalid {
                field: "sensors.resolution",
                reason: "resolution must be longer than zero".to_string(),
            });
        }

        Ok(specs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    pub duration: IsoDuration,
}

fn default_inflexible() -> Vec<SensorRole> {
    vec![SensorRole::Grid]
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlexContextConfig {
    #[serde(flatten)]
    pub settings: ContextSettings,
    /// Roles of sensors recording inflexible devices.
    #[serde(default = "default_inflexible")]
    pub inflexible: Vec<SensorRole>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeasurementConfig {
    pub sensor: SensorRole,
    pub values: Vec<f64>,
    /// Defaults to the sensor's unit.
    #[serde(default)]
    pub unit: Option<String>,
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_max_wait_ms() -> u64 {
    120_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

impl From<&SchedulerConfig> for PollSettings {
    fn from(cfg: &SchedulerConfig) -> Self {
        Self {
            interval: Duration::from_millis(cfg.poll_interval_ms),
            max_wait: Duration::from_millis(cfg.max_wait_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub platform: PlatformConfig,
    pub asset: AssetConfig,
    #[serde(default)]
    pub sensors: SensorsConfig,
    pub window: WindowConfig,
    pub flex_context: FlexContextConfig,
    pub flex_model: ModelSettings,
    #[serde(default)]
    pub measurements: Vec<MeasurementConfig>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(path)
    }

    pub fn load_from(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&contents)?)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}
