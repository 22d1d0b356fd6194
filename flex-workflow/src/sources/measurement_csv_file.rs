use std::{collections::HashMap, fs::File, path::PathBuf};

use csv::StringRecord;
use flex_client::domain::{IsoDuration, MeasurementBatch, Sensor};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::{
    error::IngestionError,
    pipeline::{Envelope, EnvelopeStream, Source},
};

/// Wide-format CSV of measurements for an existing asset.
///
/// The first column holds RFC3339 timestamps, every other column is named
/// after a sensor of the asset. Rows must be consecutive at the sensors'
/// resolution. One batch is produced per sensor column.
pub struct MeasurementCsvFileSource {
    path: PathBuf,
    sensors: HashMap<String, Sensor>,
}

impl MeasurementCsvFileSource {
    pub fn new<P: Into<PathBuf>>(path: P, sensors: impl IntoIterator<Item = Sensor>) -> Self {
        Self {
            path: path.into(),
            sensors: sensors.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }
}

fn source_err(msg: String) -> IngestionError {
    IngestionError::Source(msg)
}

fn parse_timestamp(record: &StringRecord, line: usize) -> Result<OffsetDateTime, IngestionError> {
    let raw = record
        .get(0)
        .ok_or_else(|| source_err(format!("row {line}: missing timestamp")))?;
    OffsetDateTime::parse(raw.trim(), &Rfc3339)
        .map_err(|e| source_err(format!("row {line}: invalid timestamp '{raw}': {e}")))
}

/// Turn parsed rows into one batch per sensor column.
fn columns_to_batches(
    headers: &StringRecord,
    rows: &[(OffsetDateTime, StringRecord)],
    sensors: &HashMap<String, Sensor>,
) -> Result<Vec<MeasurementBatch>, IngestionError> {
    let Some((start, _)) = rows.first() else {
        return Ok(Vec::new());
    };

    let mut batches = Vec::with_capacity(headers.len().saturating_sub(1));
    for (col, name) in headers.iter().enumerate().skip(1) {
        let name = name.trim();
        let sensor = sensors
            .get(name)
            .ok_or_else(|| source_err(format!("column '{name}' does not match any sensor of the asset")))?;

        let step = sensor.event_resolution.as_duration();
        let mut expected = *start;
        for (i, (ts, _)) in rows.iter().enumerate() {
            if i > 0 {
                expected = expected.checked_add(step).ok_or_else(|| {
                    source_err(format!("row {} of column '{name}' is out of range", i + 1))
                })?;
            }
            if *ts != expected {
                return Err(source_err(format!(
                    "row {} of column '{name}' is at {ts}, expected consecutive {} steps",
                    i + 1,
                    sensor.event_resolution
                )));
            }
        }

        let values = rows
            .iter()
            .map(|(_, record)| {
                let raw = record.get(col).unwrap_or("").trim();
                raw.parse::<f64>()
                    .map_err(|e| source_err(format!("column '{name}': invalid value '{raw}': {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let duration = sensor
            .event_resolution
            .checked_mul(values.len())
            .unwrap_or_else(|| IsoDuration::from_seconds(0));

        batches.push(MeasurementBatch {
            sensor_id: sensor.id,
            start: *start,
            duration,
            values,
            unit: sensor.unit.clone(),
        });
    }

    Ok(batches)
}

#[async_trait::async_trait]
impl Source<MeasurementBatch> for MeasurementCsvFileSource {
    async fn stream(&self) -> EnvelopeStream<MeasurementBatch> {
        let path = self.path.clone();
        let sensors = self.sensors.clone();
        let s = async_stream::try_stream! {
            let file = File::open(&path)
                .map_err(|e| source_err(format!("failed to open CSV file: {e}")))?;
            let mut rdr = csv::Reader::from_reader(file);
            let headers = rdr
                .headers()
                .map_err(|e| source_err(format!("failed to read CSV headers: {e}")))?
                .clone();

            let mut rows = Vec::new();
            for (idx, result) in rdr.records().enumerate() {
                let record = result.map_err(|e| source_err(format!("failed to read CSV record: {e}")))?;
                let ts = match parse_timestamp(&record, idx + 1) {
                    Ok(ts) => ts,
                    Err(e) => {
                        metrics::counter!("flex_measurement_csv_parse_errors_total").increment(1);
                        Err(e)?
                    }
                };
                rows.push((ts, record));
            }

            for batch in columns_to_batches(&headers, &rows, &sensors)? {
                yield Envelope::new(batch);
            }
        };

        Box::pin(s)
    }
}
