use anyhow::{bail, Result};
use flex_client::{FlexClient, Platform};
use flex_workflow::{
    config::AppConfig,
    error::ProvisioningError,
    loader::MeasurementLoader,
    observability,
    provision::{AssetSpec, Provisioner},
    sources::MeasurementCsvFileSource,
};
use std::env;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: backfill_measurements <csv_file_path>");
    }
    let file_path = &args[1];

    // FLEX_CONFIG selects the platform and the asset to load into.
    let cfg = AppConfig::load()?;
    let session = cfg.platform.session_config()?;

    let client = FlexClient::open(&session).await?;
    let result = backfill(&client, AssetSpec::from(&cfg.asset), file_path).await;
    client.close();

    let (asset_id, posted) = result?;
    println!("loaded {posted} batch(es) from {file_path} into asset {asset_id}");
    Ok(())
}

async fn backfill(client: &FlexClient, asset: AssetSpec, file_path: &str) -> Result<(u64, usize)> {
    let name = asset.name.clone();
    let provisioner = Provisioner::new(client, asset, Vec::new());
    let asset = provisioner
        .find_asset()
        .await?
        .ok_or(ProvisioningError::MissingAsset(name))?;

    let sensors = client.list_sensors(asset.id).await?;
    let source = MeasurementCsvFileSource::new(file_path, sensors.clone());

    let posted = MeasurementLoader::new(client).load(source, &sensors).await?;
    Ok((asset.id, posted))
}
