use std::{fmt, time::Duration};

use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info, instrument};
use url::Url;

use crate::{
    domain::{
        Asset, AssetUpdate, FlexContext, FlexModel, IsoDuration, JobHandle, JobStatus,
        MeasurementBatch, NewAsset, NewSensor, RemoteSchedule, SchedulePoint, Sensor,
    },
    ApiError, Platform,
};

const DEFAULT_API_PATH: &str = "api/v3_0";
const SENSOR_ENTITY_PREFIX: &str = "ea1.2021-01.io.flexmeasures:fm1.";

#[derive(Clone)]
pub enum Credentials {
    Password { email: String, password: String },
    /// A token obtained out of band; no login request is made.
    Token(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password { email, .. } => f
                .debug_struct("Password")
                .field("email", email)
                .field("password", &"<redacted>")
                .finish(),
            Self::Token(_) => f.debug_tuple("Token").field(&"<redacted>").finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// `host[:port]`, or a full base URL including the scheme.
    pub host: String,
    pub ssl: bool,
    pub api_path: String,
    pub credentials: Credentials,
    pub timeout: Duration,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            host: host.into(),
            ssl: true,
            api_path: DEFAULT_API_PATH.to_string(),
            credentials,
            timeout: Duration::from_secs(30),
        }
    }

    fn root_url(&self) -> Result<Url, ApiError> {
        let host = self.host.trim_end_matches('/');
        let root = if host.contains("://") {
            format!("{host}/")
        } else {
            let scheme = if self.ssl { "https" } else { "http" };
            format!("{scheme}://{host}/")
        };
        Ok(Url::parse(&root)?)
    }
}

/// Authenticated session against the platform HTTP API.
///
/// Obtained with [`FlexClient::open`] and released with [`FlexClient::close`],
/// which consumes the session.
pub struct FlexClient {
    http: Client,
    api_url: Url,
    token: String,
}

#[derive(Serialize)]
struct AuthTokenRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct AuthTokenResponse {
    auth_token: String,
}

#[derive(Serialize)]
struct PostSensorDataRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    sensor: String,
    #[serde(with = "time::serde::rfc3339")]
    start: OffsetDateTime,
    duration: IsoDuration,
    values: &'a [f64],
    unit: &'a str,
}

#[derive(Serialize)]
struct TriggerScheduleRequest<'a> {
    #[serde(with = "time::serde::rfc3339")]
    start: OffsetDateTime,
    duration: IsoDuration,
    #[serde(rename = "flex-context")]
    flex_context: &'a FlexContext,
    #[serde(rename = "flex-model")]
    flex_model: &'a FlexModel,
}

#[derive(Deserialize)]
struct TriggerScheduleResponse {
    schedule: String,
}

#[derive(Deserialize)]
struct ScheduleResponse {
    values: Vec<f64>,
    #[serde(with = "time::serde::rfc3339")]
    start: OffsetDateTime,
    duration: IsoDuration,
    unit: String,
}

#[derive(Deserialize)]
struct StatusMessage {
    #[serde(default)]
    message: String,
}

fn user_agent() -> String {
    format!("flex-client/{}", env!("CARGO_PKG_VERSION"))
}

async fn ensure_success(response: Response) -> Result<Response, ApiError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    Err(ApiError::Api { status, message })
}

/// Spread the returned values evenly over the returned window.
///
/// The window must divide into one whole-second step per value, and every
/// timestamp must be representable.
fn schedule_points(response: ScheduleResponse) -> Result<RemoteSchedule, ApiError> {
    if response.values.is_empty() {
        return Ok(RemoteSchedule {
            unit: response.unit,
            points: Vec::new(),
        });
    }

    let count = response.values.len();
    let uneven = || {
        ApiError::Decode(format!(
            "schedule window {} does not divide into {count} equal steps",
            response.duration
        ))
    };
    let step_seconds = i64::try_from(count)
        .ok()
        .map(|n| response.duration.whole_seconds() / n)
        .and_then(|secs| u32::try_from(secs).ok())
        .ok_or_else(uneven)?;
    let step = IsoDuration::from_seconds(step_seconds);
    if response.duration.steps_of(step) != Some(count) {
        return Err(uneven());
    }

    let mut points = Vec::with_capacity(count);
    let mut start = response.start;
    for (i, value) in response.values.iter().enumerate() {
        if i > 0 {
            start = start.checked_add(step.as_duration()).ok_or_else(|| {
                ApiError::Decode(format!(
                    "schedule point {i} after {} is out of range",
                    response.start
                ))
            })?;
        }
        points.push(SchedulePoint {
            start,
            value: *value,
        });
    }

    Ok(RemoteSchedule {
        unit: response.unit,
        points,
    })
}

/// Map a not-yet-successful schedule response onto a job status.
fn pending_status(status: u16, message: String) -> Result<JobStatus, ApiError> {
    let lowered = message.to_lowercase();
    if lowered.contains("failed") {
        Ok(JobStatus::Failed(message))
    } else if lowered.contains("in progress") || lowered.contains("started") {
        Ok(JobStatus::Started)
    } else if lowered.contains("waiting") || lowered.contains("queued") {
        Ok(JobStatus::Queued)
    } else {
        Err(ApiError::Api { status, message })
    }
}

impl FlexClient {
    /// Open a session, logging in first unless a token is supplied.
    #[instrument(skip(config), fields(host = %config.host))]
    pub async fn open(config: &SessionConfig) -> Result<Self, ApiError> {
        let root = config.root_url()?;
        let api_url = root.join(&format!("{}/", config.api_path.trim_matches('/')))?;

        let http = Client::builder()
            .user_agent(user_agent())
            .timeout(config.timeout)
            .build()?;

        let token = match &config.credentials {
            Credentials::Token(token) => token.clone(),
            Credentials::Password { email, password } => {
                Self::request_token(&http, &root, email, password).await?
            }
        };

        info!(api = %api_url, "platform session opened");
        Ok(Self {
            http,
            api_url,
            token,
        })
    }

    async fn request_token(
        http: &Client,
        root: &Url,
        email: &str,
        password: &str,
    ) -> Result<String, ApiError> {
        let url = root.join("api/requestAuthToken")?;
        let response = http
            .post(url)
            .json(&AuthTokenRequest { email, password })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Auth(format!("{status}: {message}")));
        }

        let body: AuthTokenResponse = response.json().await?;
        Ok(body.auth_token)
    }

    /// Release the session. The client cannot be used afterwards.
    pub fn close(self) {
        info!(api = %self.api_url, "platform session closed");
    }

    fn api_url(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.api_url.join(path)?)
    }
}

#[async_trait::async_trait]
impl Platform for FlexClient {
    #[instrument(skip(self))]
    async fn list_assets(&self) -> Result<Vec<Asset>, ApiError> {
        let url = self.api_url("assets")?;
        let response = self
            .http
            .get(url)
            .header("Authorization", &self.token)
            .send()
            .await?;

        let assets = ensure_success(response).await?.json().await?;
        Ok(assets)
    }

    #[instrument(skip(self, asset), fields(name = %asset.name))]
    async fn create_asset(&self, asset: &NewAsset) -> Result<Asset, ApiError> {
        let url = self.api_url("assets")?;
        let response = self
            .http
            .post(url)
            .header("Authorization", &self.token)
            .json(asset)
            .send()
            .await?;

        let created = ensure_success(response).await?.json().await?;
        Ok(created)
    }

    #[instrument(skip(self, update))]
    async fn update_asset(&self, asset_id: u64, update: &AssetUpdate) -> Result<Asset, ApiError> {
        let url = self.api_url(&format!("assets/{asset_id}"))?;
        let response = self
            .http
            .patch(url)
            .header("Authorization", &self.token)
            .json(update)
            .send()
            .await?;

        let updated = ensure_success(response).await?.json().await?;
        Ok(updated)
    }

    #[instrument(skip(self))]
    async fn delete_asset(&self, asset_id: u64) -> Result<(), ApiError> {
        let url = self.api_url(&format!("assets/{asset_id}"))?;
        let response = self
            .http
            .delete(url)
            .header("Authorization", &self.token)
            .send()
            .await?;

        ensure_success(response).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_sensors(&self, asset_id: u64) -> Result<Vec<Sensor>, ApiError> {
        let mut url = self.api_url("sensors")?;
        url.query_pairs_mut()
            .append_pair("asset_id", &asset_id.to_string());

        let response = self
            .http
            .get(url)
            .header("Authorization", &self.token)
            .send()
            .await?;

        let sensors = ensure_success(response).await?.json().await?;
        Ok(sensors)
    }

    #[instrument(skip(self, sensor), fields(name = %sensor.name, asset_id = sensor.generic_asset_id))]
    async fn create_sensor(&self, sensor: &NewSensor) -> Result<Sensor, ApiError> {
        let url = self.api_url("sensors")?;
        let response = self
            .http
            .post(url)
            .header("Authorization", &self.token)
            .json(sensor)
            .send()
            .await?;

        let created = ensure_success(response).await?.json().await?;
        Ok(created)
    }

    #[instrument(skip(self, batch), fields(sensor_id = batch.sensor_id, values = batch.values.len()))]
    async fn post_measurements(&self, batch: &MeasurementBatch) -> Result<(), ApiError> {
        let url = self.api_url("sensors/data")?;
        let request = PostSensorDataRequest {
            kind: "PostSensorDataRequest",
            sensor: format!("{SENSOR_ENTITY_PREFIX}{}", batch.sensor_id),
            start: batch.start,
            duration: batch.duration,
            values: &batch.values,
            unit: &batch.unit,
        };

        let response = self
            .http
            .post(url)
            .header("Authorization", &self.token)
            .json(&request)
            .send()
            .await?;

        ensure_success(response).await?;
        Ok(())
    }

    #[instrument(skip(self, duration, flex_context, flex_model), fields(duration = %duration))]
    async fn submit_schedule_job(
        &self,
        sensor_id: u64,
        start: OffsetDateTime,
        duration: IsoDuration,
        flex_context: &FlexContext,
        flex_model: &FlexModel,
    ) -> Result<JobHandle, ApiError> {
        let url = self.api_url(&format!("sensors/{sensor_id}/schedules/trigger"))?;
        let request = TriggerScheduleRequest {
            start,
            duration,
            flex_context,
            flex_model,
        };

        let response = self
            .http
            .post(url)
            .header("Authorization", &self.token)
            .json(&request)
            .send()
            .await?;

        let body: TriggerScheduleResponse = ensure_success(response).await?.json().await?;
        Ok(JobHandle {
            sensor_id,
            job_id: body.schedule,
            duration,
        })
    }

    #[instrument(skip(self, handle), fields(sensor_id = handle.sensor_id, job_id = %handle.job_id))]
    async fn poll_job(&self, handle: &JobHandle) -> Result<JobStatus, ApiError> {
        let mut url = self.api_url(&format!(
            "sensors/{}/schedules/{}",
            handle.sensor_id, handle.job_id
        ))?;
        url.query_pairs_mut()
            .append_pair("duration", &handle.duration.to_string());

        let response = self
            .http
            .get(url)
            .header("Authorization", &self.token)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body: ScheduleResponse = response
                .json()
                .await
                .map_err(|e| ApiError::Decode(format!("schedule body: {e}")))?;
            return Ok(JobStatus::Finished(schedule_points(body)?));
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<StatusMessage>(&text)
            .map(|m| m.message)
            .unwrap_or(text);
        debug!(status = status.as_u16(), %message, "schedule not ready");

        pending_status(status.as_u16(), message)
    }
}
