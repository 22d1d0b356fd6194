//! Flex-context and flex-model assembly.
//!
//! Inputs are validated up front by [`FlexConfigBuilder::new`], before any
//! platform call. Sensor identifiers are bound later with
//! [`FlexConfigBuilder::build`], once provisioning has resolved them.

use flex_client::domain::{
    Asset, AssetUpdate, FlexContext, FlexModel, IsoDuration, SensorReference, TimedValue,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use time::OffsetDateTime;

use crate::error::ConfigurationError;

pub const FLEX_CONTEXT_KEY: &str = "flex_context";
pub const FLEX_MODEL_KEY: &str = "flex_model";

/// First platform version that reads flex documents from the attributes bag.
const NESTED_ATTRIBUTES_SINCE: (u64, u64) = (0, 28);

static QUANTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[-+]?(\d+(\.\d*)?|\.\d+)([eE][-+]?\d+)?\s*[A-Za-z%€$£][A-Za-z0-9%€$£/*^·]*$")
        .expect("quantity pattern is valid")
});

/// Where flex documents live on an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddingMode {
    /// `flex_context` / `flex_model` are asset fields.
    TopLevel,
    /// `flex_context` / `flex_model` are keys of the asset's attributes bag.
    NestedAttributes,
}

impl EmbeddingMode {
    /// An explicit override wins; otherwise the platform version decides.
    pub fn resolve(explicit: Option<EmbeddingMode>, platform_version: Option<&str>) -> Self {
        match (explicit, platform_version) {
            (Some(mode), _) => mode,
            (None, Some(version)) => Self::for_platform_version(version),
            (None, None) => Self::NestedAttributes,
        }
    }

    /// Versions below 0.28 store flex documents as asset fields. Newer or
    /// unrecognised versions nest them in the attributes.
    pub fn for_platform_version(version: &str) -> Self {
        match parse_major_minor(version) {
            Some(v) if v < NESTED_ATTRIBUTES_SINCE => Self::TopLevel,
            _ => Self::NestedAttributes,
        }
    }
}

fn parse_major_minor(version: &str) -> Option<(u64, u64)> {
    let trimmed = version.trim().trim_start_matches('v');
    let mut parts = trimmed.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts
        .next()
        .map(|m| {
            m.chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
        })
        .unwrap_or_default()
        .parse()
        .ok()?;
    Some((major, minor))
}

fn check_quantity(field: &'static str, value: &str) -> Result<String, ConfigurationError> {
    let trimmed = value.trim();
    if QUANTITY.is_match(trimmed) {
        Ok(trimmed.to_string())
    } else {
        Err(ConfigurationError::Quantity {
            field,
            value: value.to_string(),
        })
    }
}

fn check_finite(field: &'static str, value: f64) -> Result<(), ConfigurationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigurationError::Invalid {
            field,
            reason: format!("{value} is not a finite number"),
        })
    }
}

/// A peak consumption price segment as written in the run configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceSegment {
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    pub value: String,
    pub duration: IsoDuration,
}

/// Site-level inputs of the flex context.
#[derive(Debug, Clone, Deserialize)]
pub struct ContextSettings {
    pub site_power_capacity: String,
    #[serde(default)]
    pub site_peak_consumption: Option<String>,
    #[serde(default)]
    pub site_peak_consumption_price: Vec<PriceSegment>,
}

/// Device-level inputs of the flex model.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSettings {
    pub soc_unit: String,
    pub soc_min: f64,
    pub soc_max: f64,
    pub soc_at_start: f64,
    pub power_capacity: String,
    #[serde(default)]
    pub round_trip_efficiency: Option<f64>,
    #[serde(default)]
    pub prefer_charging_sooner: Option<bool>,
}

/// Sensor identifiers referenced from the flex context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceSensors {
    pub consumption: u64,
    pub production: u64,
    pub inflexible: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct FlexConfigBuilder {
    site_power_capacity: String,
    site_peak_consumption: Option<String>,
    site_peak_consumption_price: Vec<TimedValue>,
    model: FlexModel,
    embedding: EmbeddingMode,
}

impl FlexConfigBuilder {
    /// Validate inputs.
    ///
    /// Rules:
    /// - soc-min <= soc-max and soc-at-start within [soc-min, soc-max].
    /// - capacities, peak limits and peak prices are a number followed by a unit.
    /// - soc-unit is an energy unit (ends in `Wh`).
    /// - round-trip-efficiency, when given, is in (0, 1].
    pub fn new(
        context: &ContextSettings,
        model: &ModelSettings,
        embedding: EmbeddingMode,
    ) -> Result<Self, ConfigurationError> {
        check_finite("soc-min", model.soc_min)?;
        check_finite("soc-max", model.soc_max)?;
        check_finite("soc-at-start", model.soc_at_start)?;

        if model.soc_min > model.soc_max {
            return Err(ConfigurationError::SocBounds {
                min: model.soc_min,
                max: model.soc_max,
            });
        }
        if model.soc_at_start < model.soc_min || model.soc_at_start > model.soc_max {
            return Err(ConfigurationError::SocStart {
                start: model.soc_at_start,
                min: model.soc_min,
                max: model.soc_max,
            });
        }

        let soc_unit = model.soc_unit.trim();
        if soc_unit.is_empty()
            || !soc_unit.ends_with("Wh")
            || !soc_unit.chars().all(|c| c.is_ascii_alphabetic())
        {
            return Err(ConfigurationError::Invalid {
                field: "soc-unit",
                reason: format!("'{}' is not an energy unit", model.soc_unit),
            });
        }

        if let Some(eff) = model.round_trip_efficiency {
            if !(eff > 0.0 && eff <= 1.0) {
                return Err(ConfigurationError::Invalid {
                    field: "round-trip-efficiency",
                    reason: format!("{eff} is outside (0, 1]"),
                });
            }
        }

        let power_capacity = check_quantity("power-capacity", &model.power_capacity)?;
        let site_power_capacity = check_quantity("site-power-capacity", &context.site_power_capacity)?;
        let site_peak_consumption = context
            .site_peak_consumption
            .as_deref()
            .map(|v| check_quantity("site-peak-consumption", v))
            .transpose()?;

        let site_peak_consumption_price = context
            .site_peak_consumption_price
            .iter()
            .map(|segment| {
                if segment.duration.is_zero() {
                    return Err(ConfigurationError::Invalid {
                        field: "site-peak-consumption-price",
                        reason: "segment duration must be positive".to_string(),
                    });
                }
                Ok(TimedValue {
                    start: segment.start,
                    value: check_quantity("site-peak-consumption-price", &segment.value)?,
                    duration: segment.duration,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            site_power_capacity,
            site_peak_consumption,
            site_peak_consumption_price,
            model: FlexModel {
                soc_unit: soc_unit.to_string(),
                soc_min: model.soc_min,
                soc_max: model.soc_max,
                soc_at_start: model.soc_at_start,
                power_capacity,
                round_trip_efficiency: model.round_trip_efficiency,
                prefer_charging_sooner: model.prefer_charging_sooner,
            },
            embedding,
        })
    }

    pub fn embedding(&self) -> EmbeddingMode {
        self.embedding
    }

    pub fn build(&self, sensors: &PriceSensors) -> FlexConfig {
        let site_peak_consumption_price = if self.site_peak_consumption_price.is_empty() {
            None
        } else {
            Some(self.site_peak_consumption_price.clone())
        };

        FlexConfig {
            context: FlexContext {
                consumption_price: SensorReference {
                    sensor: sensors.consumption,
                },
                production_price: SensorReference {
                    sensor: sensors.production,
                },
                site_power_capacity: self.site_power_capacity.clone(),
                site_peak_consumption: self.site_peak_consumption.clone(),
                site_peak_consumption_price,
                inflexible_device_sensors: sensors.inflexible.clone(),
            },
            model: self.model.clone(),
            embedding: self.embedding,
        }
    }
}

/// Flex documents bound to concrete sensors, plus where to store them.
#[derive(Debug, Clone, PartialEq)]
pub struct FlexConfig {
    pub context: FlexContext,
    pub model: FlexModel,
    pub embedding: EmbeddingMode,
}

fn encode<T: serde::Serialize>(
    field: &'static str,
    doc: &T,
) -> Result<serde_json::Value, ConfigurationError> {
    serde_json::to_value(doc).map_err(|e| ConfigurationError::Invalid {
        field,
        reason: e.to_string(),
    })
}

fn decode<T: serde::de::DeserializeOwned>(
    field: &'static str,
    value: Option<&serde_json::Value>,
) -> Result<Option<T>, ConfigurationError> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| ConfigurationError::Invalid {
                field,
                reason: e.to_string(),
            }),
    }
}

impl FlexConfig {
    /// Asset update storing both documents. With nested embedding the
    /// existing attributes are kept and only the two flex keys replaced.
    pub fn asset_update(&self, asset: &Asset) -> Result<AssetUpdate, ConfigurationError> {
        let context = encode("flex-context", &self.context)?;
        let model = encode("flex-model", &self.model)?;

        let update = match self.embedding {
            EmbeddingMode::TopLevel => AssetUpdate {
                flex_context: Some(context),
                flex_model: Some(model),
                ..Default::default()
            },
            EmbeddingMode::NestedAttributes => {
                let mut attributes = asset.attributes.clone();
                attributes.insert(FLEX_CONTEXT_KEY, context);
                attributes.insert(FLEX_MODEL_KEY, model);
                AssetUpdate {
                    attributes: Some(attributes),
                    ..Default::default()
                }
            }
        };
        Ok(update)
    }

    /// Read flex documents back from an asset. `None` if either is missing.
    pub fn read_from(
        asset: &Asset,
        embedding: EmbeddingMode,
    ) -> Result<Option<FlexConfig>, ConfigurationError> {
        let (context, model) = match embedding {
            EmbeddingMode::TopLevel => (asset.flex_context.as_ref(), asset.flex_model.as_ref()),
            EmbeddingMode::NestedAttributes => (
                asset.attributes.get(FLEX_CONTEXT_KEY),
                asset.attributes.get(FLEX_MODEL_KEY),
            ),
        };

        let context: Option<FlexContext> = decode("flex-context", context)?;
        let model: Option<FlexModel> = decode("flex-model", model)?;

        Ok(match (context, model) {
            (Some(context), Some(model)) => Some(FlexConfig {
                context,
                model,
                embedding,
            }),
            _ => None,
        })
    }
}
