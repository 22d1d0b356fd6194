use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Free-form key/value bag stored on an asset.
///
/// The platform returns attributes either as a JSON object or as a
/// JSON-encoded string depending on its version. Both shapes (and `null`)
/// decode into the same map; serialisation always produces one encoded
/// string, which is what the update endpoint accepts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(Map<String, Value>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encode as the JSON text the platform stores.
    pub fn encode(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }

    /// Decode from a JSON value that is an object, an encoded object string,
    /// or null.
    pub fn decode(value: Value) -> Result<Self, String> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Object(map) => Ok(Self(map)),
            Value::String(text) if text.trim().is_empty() => Ok(Self::default()),
            Value::String(text) => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(map)) => Ok(Self(map)),
                Ok(Value::Null) => Ok(Self::default()),
                Ok(other) => Err(format!("attributes must encode an object, got {other}")),
                Err(e) => Err(format!("attributes are not valid JSON: {e}")),
            },
            other => Err(format!("attributes must be an object or string, got {other}")),
        }
    }
}

impl From<Map<String, Value>> for Attributes {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl Serialize for Attributes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Attributes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Self::decode(raw).map_err(serde::de::Error::custom)
    }
}

/// One chart on the asset page and the sensors plotted on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartGroup {
    pub title: String,
    pub sensors: Vec<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Asset {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub generic_asset_type_id: Option<u64>,
    #[serde(default)]
    pub account_id: Option<u64>,
    #[serde(default)]
    pub attributes: Attributes,
    /// Present only on platform versions that store the flex context as an
    /// asset field.
    #[serde(default)]
    pub flex_context: Option<Value>,
    #[serde(default)]
    pub flex_model: Option<Value>,
    #[serde(default)]
    pub sensors_to_show: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewAsset {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub generic_asset_type_id: u64,
    pub account_id: u64,
}

/// Partial update sent with `PATCH /assets/{id}`. Absent fields are left
/// untouched by the platform.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AssetUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flex_context: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flex_model: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensors_to_show: Option<Vec<ChartGroup>>,
}
