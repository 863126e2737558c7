//! Type resolution configuration.
//!
//! Maps a JSON Schema type (and, for strings, an optional `format`) onto an
//! output field type plus extra field properties, and carries the detection
//! flags written on the mapping root.
//!
//! # Configuration document
//!
//! ```json
//! {
//!   "types": [
//!     { "json_type": "string", "json_format": "mydate", "es_type": "date" },
//!     { "json_type": "number", "es_type": "short", "es_props": { "store": true } }
//!   ],
//!   "date_format": "YYYY",
//!   "all_field": false,
//!   "date_detection": false,
//!   "numeric_detection": false
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;
use crate::loader::load_document;
use crate::types::{JsonType, DATE_TYPE};

/// Output type and extra properties registered for a JSON type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeEntry {
    pub es_type: String,
    pub props: Map<String, Value>,
}

impl TypeEntry {
    fn new(es_type: impl Into<String>, props: Option<Map<String, Value>>) -> Self {
        Self {
            es_type: es_type.into(),
            props: props.unwrap_or_default(),
        }
    }
}

/// Immutable type resolution configuration.
///
/// The four base JSON types always have an entry; registrations replace
/// entries but never remove them.
#[derive(Debug, Clone)]
pub struct MappingConfig {
    types: [TypeEntry; 4],
    formats: HashMap<String, TypeEntry>,
    all_field: bool,
    date_detection: bool,
    numeric_detection: bool,
    date_format: Option<String>,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            types: JsonType::ALL.map(|json_type| {
                let es_type = match json_type {
                    JsonType::String => "string",
                    JsonType::Boolean => "boolean",
                    JsonType::Number => "double",
                    JsonType::Integer => "integer",
                };
                TypeEntry::new(es_type, None)
            }),
            formats: HashMap::new(),
            all_field: true,
            date_detection: true,
            numeric_detection: true,
            date_format: None,
        }
    }
}

impl MappingConfig {
    /// Start from the default configuration.
    pub fn builder() -> MappingConfigBuilder {
        MappingConfigBuilder::default()
    }

    /// Build a configuration from a configuration document.
    pub fn from_document(doc: &ConfigDocument) -> Result<Self, ConfigError> {
        Ok(Self::builder().load(doc)?.build())
    }

    /// Resolve a JSON type and optional format to its output type.
    ///
    /// A format only matters for strings, and only when registered; otherwise
    /// the plain type entry is used. `date` entries without an explicit
    /// `format` property receive the default date format, when one is set.
    pub fn resolve(&self, json_type: JsonType, json_format: Option<&str>) -> TypeEntry {
        let stored = json_format
            .filter(|_| json_type == JsonType::String)
            .and_then(|format| self.formats.get(format))
            .unwrap_or(&self.types[json_type.index()]);

        let mut entry = stored.clone();
        if entry.es_type == DATE_TYPE && !entry.props.contains_key("format") {
            if let Some(date_format) = &self.date_format {
                entry
                    .props
                    .insert("format".to_string(), Value::String(date_format.clone()));
            }
        }
        entry
    }

    pub fn all_field(&self) -> bool {
        self.all_field
    }

    pub fn date_detection(&self) -> bool {
        self.date_detection
    }

    pub fn numeric_detection(&self) -> bool {
        self.numeric_detection
    }

    pub fn date_format(&self) -> Option<&str> {
        self.date_format.as_deref()
    }
}

/// Consuming builder for [`MappingConfig`].
#[derive(Debug, Clone, Default)]
pub struct MappingConfigBuilder {
    config: MappingConfig,
}

impl MappingConfigBuilder {
    /// Map a JSON type to an output type. Last registration wins.
    ///
    /// `json_format` is only honoured for `string`; registering `string`
    /// without a format replaces the default string mapping.
    pub fn map_type(
        mut self,
        es_type: impl Into<String>,
        json_type: JsonType,
        json_format: Option<&str>,
        es_props: Option<Map<String, Value>>,
    ) -> Self {
        let entry = TypeEntry::new(es_type, es_props);
        match json_format {
            Some(format) if json_type == JsonType::String => {
                self.config.formats.insert(format.to_string(), entry);
            }
            _ => self.config.types[json_type.index()] = entry,
        }
        self
    }

    pub fn all_field(mut self, enabled: bool) -> Self {
        self.config.all_field = enabled;
        self
    }

    pub fn date_detection(mut self, enabled: bool) -> Self {
        self.config.date_detection = enabled;
        self
    }

    pub fn numeric_detection(mut self, enabled: bool) -> Self {
        self.config.numeric_detection = enabled;
        self
    }

    pub fn date_format(mut self, format: impl Into<String>) -> Self {
        self.config.date_format = Some(format.into());
        self
    }

    /// Apply a configuration document on top of the current settings.
    ///
    /// Type records are applied in order, then any flag present in the
    /// document overrides the current value.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnsupportedJsonType` if a record names a type
    /// other than string, boolean, number or integer.
    pub fn load(mut self, doc: &ConfigDocument) -> Result<Self, ConfigError> {
        for record in &doc.types {
            let json_type: JsonType = record.json_type.parse()?;
            self = self.map_type(
                record.es_type.clone(),
                json_type,
                record.json_format.as_deref(),
                record.es_props.clone(),
            );
        }
        if let Some(enabled) = doc.all_field {
            self.config.all_field = enabled;
        }
        if let Some(format) = &doc.date_format {
            self.config.date_format = Some(format.clone());
        }
        if let Some(enabled) = doc.date_detection {
            self.config.date_detection = enabled;
        }
        if let Some(enabled) = doc.numeric_detection {
            self.config.numeric_detection = enabled;
        }
        Ok(self)
    }

    pub fn build(self) -> MappingConfig {
        self.config
    }
}

/// One type registration in a configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeRecord {
    pub es_type: String,
    pub json_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub es_props: Option<Map<String, Value>>,
}

/// Configuration document as read from JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub types: Vec<TypeRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_field: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_detection: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_detection: Option<bool>,
}

impl ConfigDocument {
    /// Interpret a parsed JSON value as a configuration document.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        serde_json::from_value(value).map_err(|source| ConfigError::InvalidDocument { source })
    }

    /// Read a configuration document from a file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        Self::from_value(load_document(path)?)
    }
}
