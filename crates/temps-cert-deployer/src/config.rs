//! Untyped provider configuration and the typed views built from it
//!
//! The calling workflow hands every provider two key/value bags: the access
//! credentials and the provider-specific extended options. Credentials are
//! populated into a typed struct in one step and validated for required fields;
//! extended options are read one key at a time with defaulting accessors.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ConfigError;

/// Untyped configuration map
pub type ConfigMap = serde_json::Map<String, Value>;

/// Options passed to every provider constructor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderFactoryOptions {
    pub access_config: ConfigMap,
    pub extended_config: ConfigMap,
    #[serde(with = "duration_secs")]
    pub dns_propagation_timeout: Duration,
    #[serde(rename = "dnsTTL")]
    pub dns_ttl: i32,
}

impl ProviderFactoryOptions {
    pub fn new(access_config: ConfigMap, extended_config: ConfigMap) -> Self {
        Self {
            access_config,
            extended_config,
            ..Default::default()
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

/// Types that declare which of their fields must be non-empty
pub trait RequiredFields {
    /// Name used in error messages
    const NAME: &'static str;

    /// Returns the (serialized) names of required fields that are empty
    fn missing_required(&self) -> Vec<&'static str>;
}

/// Push `name` into `missing` when `value` holds its zero value
pub fn require<T: ZeroValue + ?Sized>(missing: &mut Vec<&'static str>, name: &'static str, value: &T) {
    if value.is_zero() {
        missing.push(name);
    }
}

/// Structural emptiness check used by [`RequiredFields`]
pub trait ZeroValue {
    fn is_zero(&self) -> bool;
}

impl ZeroValue for str {
    fn is_zero(&self) -> bool {
        self.trim().is_empty()
    }
}

impl ZeroValue for String {
    fn is_zero(&self) -> bool {
        self.as_str().is_zero()
    }
}

impl<T> ZeroValue for Vec<T> {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<T: ZeroValue> ZeroValue for Option<T> {
    fn is_zero(&self) -> bool {
        self.as_ref().map_or(true, ZeroValue::is_zero)
    }
}

macro_rules! impl_zero_value_for_numbers {
    ($($ty:ty),*) => {
        $(impl ZeroValue for $ty {
            fn is_zero(&self) -> bool {
                *self == 0
            }
        })*
    };
}

impl_zero_value_for_numbers!(i32, i64, u16, u32, u64);

/// Populate a typed config from an untyped map.
///
/// Keys are matched to fields by their serialized name and unknown keys are
/// ignored. A `null` value counts as absent. Every missing required field is
/// reported in a single error.
pub fn populate<T>(raw: &ConfigMap) -> Result<T, ConfigError>
where
    T: DeserializeOwned + RequiredFields,
{
    let present: ConfigMap = raw
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let value: T = serde_json::from_value(Value::Object(present))?;

    let missing = value.missing_required();
    if !missing.is_empty() {
        return Err(ConfigError::MissingFields {
            provider: T::NAME.to_string(),
            fields: missing,
        });
    }

    Ok(value)
}

/// `deserialize_with` helpers for fields that form-based clients store as
/// strings (`"true"`, `"5001"`)
pub mod lenient {
    use std::fmt::Display;
    use std::str::FromStr;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar<T> {
        Native(T),
        Text(String),
    }

    pub fn bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        match Scalar::<bool>::deserialize(deserializer)? {
            Scalar::Native(b) => Ok(b),
            Scalar::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" | "" => Ok(false),
                other => Err(D::Error::custom(format!("invalid boolean: '{}'", other))),
            },
        }
    }

    pub fn number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + FromStr + Default,
        T::Err: Display,
    {
        match Scalar::<T>::deserialize(deserializer)? {
            Scalar::Native(n) => Ok(n),
            Scalar::Text(s) if s.trim().is_empty() => Ok(T::default()),
            Scalar::Text(s) => s.trim().parse().map_err(D::Error::custom),
        }
    }
}

/// Read a string option, empty when absent
pub fn get_string(map: &ConfigMap, key: &str) -> String {
    get_string_or(map, key, "")
}

/// Read a string option; numbers and booleans are rendered as text
pub fn get_string_or(map: &ConfigMap, key: &str, default: &str) -> String {
    match map.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => default.to_string(),
    }
}

/// Read a boolean option, false when absent
pub fn get_bool(map: &ConfigMap, key: &str) -> bool {
    get_bool_or(map, key, false)
}

pub fn get_bool_or(map: &ConfigMap, key: &str, default: bool) -> bool {
    match map.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            _ => default,
        },
        Some(Value::Number(n)) => n.as_i64().map(|v| v != 0).unwrap_or(default),
        _ => default,
    }
}

pub fn get_i64_or(map: &ConfigMap, key: &str, default: i64) -> i64 {
    match map.get(key) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

/// Read a list of strings.
///
/// Accepts a JSON array or a single string holding `;`, `,` or newline
/// separated values. Blank entries are dropped.
pub fn get_string_list(map: &ConfigMap, key: &str) -> Vec<String> {
    let raw: Vec<String> = match map.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => s
            .split(|c| c == ';' || c == ',' || c == '\n')
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    raw.into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
