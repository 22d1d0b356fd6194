//! Idempotent asset and sensor provisioning.
//!
//! Assets are matched by exact name and sensors by exact name within their
//! asset. Every required sensor is looked up before anything is created, so
//! repeated runs reuse what exists and only fill gaps.

use std::collections::BTreeMap;

use flex_client::{
    domain::{Asset, ChartGroup, IsoDuration, NewAsset, NewSensor, Sensor},
    Platform,
};
use futures::future::try_join_all;
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    error::ProvisioningError,
    flex::{FlexConfig, FlexConfigBuilder, PriceSensors},
};

/// The part a sensor plays for the battery asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorRole {
    Grid,
    Power,
    BuyPrice,
    SellPrice,
}

impl SensorRole {
    pub const ALL: [SensorRole; 4] = [
        SensorRole::Grid,
        SensorRole::Power,
        SensorRole::BuyPrice,
        SensorRole::SellPrice,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Grid => "grid",
            Self::Power => "power",
            Self::BuyPrice => "buy-price",
            Self::SellPrice => "sell-price",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssetSpec {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub generic_asset_type_id: u64,
    pub account_id: u64,
}

#[derive(Debug, Clone)]
pub struct SensorSpec {
    pub role: SensorRole,
    pub name: String,
    pub unit: String,
    pub resolution: IsoDuration,
}

#[derive(Debug, Clone)]
pub struct ProvisionedAsset {
    pub asset: Asset,
    pub sensors: BTreeMap<SensorRole, Sensor>,
    pub flex: FlexConfig,
    pub created_asset: bool,
    pub created_sensors: Vec<SensorRole>,
}

impl ProvisionedAsset {
    pub fn sensor(&self, role: SensorRole) -> Option<&Sensor> {
        self.sensors.get(&role)
    }

    pub fn sensor_named(&self, name: &str) -> Option<&Sensor> {
        self.sensors.values().find(|s| s.name == name)
    }
}

/// Chart layout for the asset page: grid with battery power, buy with sell price.
pub fn chart_groups(sensors: &BTreeMap<SensorRole, Sensor>) -> Vec<ChartGroup> {
    let ids = |roles: &[SensorRole]| -> Vec<u64> {
        roles
            .iter()
            .filter_map(|role| sensors.get(role).map(|s| s.id))
            .collect()
    };

    vec![
        ChartGroup {
            title: "Power Graph".to_string(),
            sensors: ids(&[SensorRole::Grid, SensorRole::Power]),
        },
        ChartGroup {
            title: "Price Graph".to_string(),
            sensors: ids(&[SensorRole::BuyPrice, SensorRole::SellPrice]),
        },
    ]
}

fn transport(action: impl Into<String>) -> impl FnOnce(flex_client::ApiError) -> ProvisioningError {
    let action = action.into();
    move |source| ProvisioningError::Transport { action, source }
}

pub struct Provisioner<'a, P: ?Sized> {
    platform: &'a P,
    asset: AssetSpec,
    sensors: Vec<SensorSpec>,
}

impl<'a, P> Provisioner<'a, P>
where
    P: Platform + ?Sized,
{
    pub fn new(platform: &'a P, asset: AssetSpec, sensors: Vec<SensorSpec>) -> Self {
        Self {
            platform,
            asset,
            sensors,
        }
    }

    /// Find the asset by exact name. More than one match is an error.
    pub async fn find_asset(&self) -> Result<Option<Asset>, ProvisioningError> {
        let assets = self
            .platform
            .list_assets()
            .await
            .map_err(transport("listing assets"))?;

        let mut matches: Vec<Asset> = assets
            .into_iter()
            .filter(|a| a.name == self.asset.name)
            .collect();

        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            count => Err(ProvisioningError::AmbiguousAsset {
                name: self.asset.name.clone(),
                count,
            }),
        }
    }

    /// Ensure the asset and all required sensors exist, then store the flex
    /// documents and chart layout on the asset.
    pub async fn ensure(
        &self,
        flex: &FlexConfigBuilder,
        inflexible: &[SensorRole],
    ) -> Result<ProvisionedAsset, ProvisioningError> {
        let (asset, created_asset) = match self.find_asset().await? {
            Some(asset) => {
                info!(asset_id = asset.id, name = %asset.name, "reusing existing asset");
                (asset, false)
            }
            None => (self.create_asset().await?, true),
        };

        let (sensors, created_sensors) = self.ensure_sensors(asset.id).await?;

        let price_sensors = price_sensors(&sensors, inflexible)?;
        let flex = flex.build(&price_sensors);

        let mut update = flex.asset_update(&asset)?;
        update.sensors_to_show = Some(chart_groups(&sensors));

        let asset = self
            .platform
            .update_asset(asset.id, &update)
            .await
            .map_err(transport(format!("updating asset {}", asset.id)))?;

        info!(
            asset_id = asset.id,
            created_asset,
            created_sensors = created_sensors.len(),
            embedding = ?flex.embedding,
            "asset provisioned"
        );

        Ok(ProvisionedAsset {
            asset,
            sensors,
            flex,
            created_asset,
            created_sensors,
        })
    }

    /// Delete the named asset if it exists. Only used for an explicit re-create.
    pub async fn delete_existing(&self) -> Result<Option<u64>, ProvisioningError> {
        let Some(asset) = self.find_asset().await? else {
            return Ok(None);
        };

        self.platform
            .delete_asset(asset.id)
            .await
            .map_err(transport(format!("deleting asset {}", asset.id)))?;

        warn!(asset_id = asset.id, name = %asset.name, "asset deleted for re-creation");
        metrics::counter!("flex_assets_deleted_total").increment(1);
        Ok(Some(asset.id))
    }

    async fn create_asset(&self) -> Result<Asset, ProvisioningError> {
        let request = NewAsset {
            name: self.asset.name.clone(),
            latitude: self.asset.latitude,
            longitude: self.asset.longitude,
            generic_asset_type_id: self.asset.generic_asset_type_id,
            account_id: self.asset.account_id,
        };

        let asset = self
            .platform
            .create_asset(&request)
            .await
            .map_err(transport(format!("creating asset '{}'", self.asset.name)))?;

        info!(asset_id = asset.id, name = %asset.name, "asset created");
        metrics::counter!("flex_assets_created_total").increment(1);
        Ok(asset)
    }

    /// Look up every required sensor by name, then create only the missing ones.
    pub async fn ensure_sensors(
        &self,
        asset_id: u64,
    ) -> Result<(BTreeMap<SensorRole, Sensor>, Vec<SensorRole>), ProvisioningError> {
        let existing = self
            .platform
            .list_sensors(asset_id)
            .await
            .map_err(transport(format!("listing sensors of asset {asset_id}")))?;

        let mut resolved = BTreeMap::new();
        let mut missing = Vec::new();

        for spec in &self.sensors {
            let mut found: Vec<&Sensor> = existing.iter().filter(|s| s.name == spec.name).collect();
            match found.len() {
                0 => missing.push(spec),
                1 => {
                    let sensor = found.remove(0);
                    if sensor.unit != spec.unit || sensor.event_resolution != spec.resolution {
                        warn!(
                            sensor_id = sensor.id,
                            name = %sensor.name,
                            unit = %sensor.unit,
                            resolution = %sensor.event_resolution,
                            "existing sensor differs from the requested unit or resolution"
                        );
                    }
                    metrics::counter!("flex_sensors_reused_total").increment(1);
                    resolved.insert(spec.role, sensor.clone());
                }
                count => {
                    return Err(ProvisioningError::AmbiguousSensor {
                        asset_id,
                        name: spec.name.clone(),
                        count,
                    })
                }
            }
        }

        // Every name was checked above; only now are the missing ones created.
        let created = try_join_all(missing.iter().map(|spec| async move {
            let request = NewSensor {
                name: spec.name.clone(),
                event_resolution: spec.resolution,
                unit: spec.unit.clone(),
                generic_asset_id: asset_id,
            };
            let sensor = self
                .platform
                .create_sensor(&request)
                .await
                .map_err(transport(format!(
                    "creating sensor '{}' on asset {asset_id}",
                    spec.name
                )))?;
            info!(sensor_id = sensor.id, name = %sensor.name, role = spec.role.label(), "sensor created");
            metrics::counter!("flex_sensors_created_total").increment(1);
            Ok::<_, ProvisioningError>((spec.role, sensor))
        }))
        .await?;

        let created_roles = created.iter().map(|(role, _)| *role).collect();
        resolved.extend(created);

        Ok((resolved, created_roles))
    }
}

fn price_sensors(
    sensors: &BTreeMap<SensorRole, Sensor>,
    inflexible: &[SensorRole],
) -> Result<PriceSensors, ProvisioningError> {
    let id = |role: SensorRole| {
        sensors
            .get(&role)
            .map(|s| s.id)
            .ok_or_else(|| {
                ProvisioningError::Configuration(crate::error::ConfigurationError::Invalid {
                    field: "sensors",
                    reason: format!("no {} sensor is configured", role.label()),
                })
            })
    };

    Ok(PriceSensors {
        consumption: id(SensorRole::BuyPrice)?,
        production: id(SensorRole::SellPrice)?,
        inflexible: inflexible.iter().map(|r| id(*r)).collect::<Result<_, _>>()?,
    })
}
