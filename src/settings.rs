// config lets you read a separate config file
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::datatype::ValueType;
use crate::error::Result;

/// Runtime settings, layered from built-in defaults, an optional
/// `metaquery.toml` and `METAQUERY_*` environment variables.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Settings {
    pub log_filter: String,
    pub database: String,
    /// Type assumed for query fields that have no definition.
    pub default_type: ValueType,
    pub optimize: bool,
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("metaquery").required(false),
        };
        let defaults = Self::default();
        let settings = Config::builder()
            .set_default("log_filter", defaults.log_filter)?
            .set_default("database", defaults.database)?
            .set_default("default_type", defaults.default_type.name())?
            .set_default("optimize", defaults.optimize)?
            .add_source(file)
            .add_source(Environment::with_prefix("METAQUERY"))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            database: "metaquery.db".to_string(),
            default_type: ValueType::String,
            optimize: true,
        }
    }
}
