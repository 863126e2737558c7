//! Core types shared by the compiler and the templating layer.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// Output type for object nodes.
pub const OBJECT_TYPE: &str = "object";

/// Output type that receives the configured default date format.
pub const DATE_TYPE: &str = "date";

/// Schema keywords whose branches are merged into a single output node.
pub const COMPOSITION_KEYWORDS: &[&str] = &["allOf", "anyOf", "oneOf"];

/// Key wrapping a collection of named mappings.
pub const MAPPINGS_KEY: &str = "mappings";

/// JSON Schema types that map onto a configured output type.
///
/// `object` and `array` are handled structurally by the compiler and never
/// go through the type configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    String,
    Boolean,
    Number,
    Integer,
}

impl JsonType {
    pub const ALL: [JsonType; 4] = [
        JsonType::String,
        JsonType::Boolean,
        JsonType::Number,
        JsonType::Integer,
    ];

    /// Parse a JSON type name.
    ///
    /// Returns `None` for names without a type mapping.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(JsonType::String),
            "boolean" => Some(JsonType::Boolean),
            "number" => Some(JsonType::Number),
            "integer" => Some(JsonType::Integer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JsonType::String => "string",
            JsonType::Boolean => "boolean",
            JsonType::Number => "number",
            JsonType::Integer => "integer",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl FromStr for JsonType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JsonType::parse(s).ok_or_else(|| ConfigError::UnsupportedJsonType {
            name: s.to_string(),
        })
    }
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One node of a generated mapping.
///
/// A leaf carries a `type` plus the extra properties of its resolved type
/// entry. An object carries `properties`; nested objects also carry
/// `type: "object"`, while the root has `properties` and no `type`.
///
/// Serializes as `type`, then the extra entries, then `properties`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingNode {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<IndexMap<String, MappingNode>>,
}

impl MappingNode {
    /// The type this node has been given so far, if any.
    ///
    /// A node with `properties` is an object regardless of its `type` key.
    pub fn effective_type(&self) -> Option<&str> {
        if self.properties.is_some() {
            Some(OBJECT_TYPE)
        } else {
            self.field_type.as_deref()
        }
    }

    /// Whether this node is a mapping root (has properties but no type).
    pub fn is_root(&self) -> bool {
        self.properties.is_some() && self.field_type.is_none()
    }

    /// Look up a direct child field.
    pub fn property(&self, name: &str) -> Option<&MappingNode> {
        self.properties.as_ref()?.get(name)
    }

    /// Convert into a plain JSON value.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(field_type) = &self.field_type {
            map.insert("type".to_string(), Value::String(field_type.clone()));
        }
        for (key, value) in &self.extra {
            map.insert(key.clone(), value.clone());
        }
        if let Some(properties) = &self.properties {
            let props = properties
                .iter()
                .map(|(name, node)| (name.clone(), node.to_value()))
                .collect();
            map.insert("properties".to_string(), Value::Object(props));
        }
        Value::Object(map)
    }
}

impl From<&MappingNode> for Value {
    fn from(node: &MappingNode) -> Self {
        node.to_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_type_parse_valid() {
        assert_eq!(JsonType::parse("string"), Some(JsonType::String));
        assert_eq!(JsonType::parse("integer"), Some(JsonType::Integer));
    }

    #[test]
    fn json_type_parse_invalid() {
        assert_eq!(JsonType::parse("object"), None);
        assert_eq!(JsonType::parse("null"), None);
        assert!(matches!(
            "array".parse::<JsonType>(),
            Err(ConfigError::UnsupportedJsonType { name }) if name == "array"
        ));
    }

    #[test]
    fn effective_type_of_object_node() {
        let node = MappingNode {
            properties: Some(IndexMap::new()),
            ..Default::default()
        };
        assert_eq!(node.effective_type(), Some("object"));
        assert!(node.is_root());

        let leaf = MappingNode {
            field_type: Some("keyword".into()),
            ..Default::default()
        };
        assert_eq!(leaf.effective_type(), Some("keyword"));
        assert!(!leaf.is_root());
        assert_eq!(MappingNode::default().effective_type(), None);
    }

    #[test]
    fn to_value_orders_type_extra_properties() {
        let mut properties = IndexMap::new();
        properties.insert(
            "created".to_string(),
            MappingNode {
                field_type: Some("date".into()),
                extra: json!({"format": "YYYY"}).as_object().cloned().unwrap(),
                properties: None,
            },
        );
        let node = MappingNode {
            field_type: Some("object".into()),
            extra: Map::new(),
            properties: Some(properties),
        };

        let value = node.to_value();
        assert_eq!(
            value,
            json!({
                "type": "object",
                "properties": {"created": {"type": "date", "format": "YYYY"}}
            })
        );
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["type", "properties"]);
    }

    #[test]
    fn serde_matches_to_value() {
        let value = json!({
            "_all": {"enable": true},
            "properties": {"n": {"type": "string", "index": "not_analyzed"}}
        });
        let node: MappingNode = serde_json::from_value(value.clone()).unwrap();
        assert!(node.is_root());
        assert_eq!(node.property("n").unwrap().extra["index"], "not_analyzed");
        assert_eq!(serde_json::to_value(&node).unwrap(), value);
        assert_eq!(node.to_value(), value);
    }
}
