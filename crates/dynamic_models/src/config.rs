//! Settings for dynamic models.
//!
//! Settings are plain data: build them in code from [Config::default], or load them from JSON with
//! [Config::from_json], in which case any key not present takes its default.
use std::time::Duration;

use crate::errors::Result;
use crate::field::FieldSpec;

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    /// Namespace of the models created through a facade.  Prefixes table names.
    pub app_label: String,

    /// Fields which every dynamic model gets, in addition to the ones in its schema.
    pub default_fields: Vec<FieldSpec>,

    /// Used for `char` fields which don't specify a max length.
    pub default_charfield_max_length: u32,

    pub cache_key_prefix: String,

    /// How long last-modified markers live in the cache.
    #[serde(with = "duration_secs", rename = "cache_timeout_secs")]
    pub cache_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            app_label: "dynamic_models".into(),
            default_fields: vec![],
            default_charfield_max_length: 255,
            cache_key_prefix: "dynamic_models_".into(),
            cache_timeout: Duration::from_secs(60 * 60 * 24),
        }
    }
}

impl Config {
    pub fn from_json(json: &str) -> Result<Config> {
        Ok(serde_json::from_str(json)?)
    }
}

mod duration_secs {
    use std::time::Duration;

    pub fn serialize<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs: u64 = serde::Deserialize::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
