//! JSON Schema to search index mapping compiler.
//!
//! Turns a JSON Schema into an index mapping: objects become `properties`
//! trees, scalars are mapped through a configurable type table, `$ref`s are
//! followed (including external documents), and composition keywords
//! (`allOf`, `anyOf`, `oneOf`) and schema dependencies are merged into one
//! mapping. Generated mappings can be printed as block-annotated templates,
//! overridden through template inheritance, and rendered back.
//!
//! # Example
//!
//! ```
//! use schema_mapping::{compile, MappingConfig};
//! use serde_json::json;
//! use std::collections::HashMap;
//!
//! let schema = json!({
//!     "id": "https://example.org/person",
//!     "type": "object",
//!     "properties": {
//!         "name": { "type": "string" },
//!         "tags": { "type": "array", "items": { "enum": ["a", "b"] } },
//!         "born": { "$ref": "#/definitions/year" }
//!     },
//!     "definitions": { "year": { "type": "integer" } }
//! });
//!
//! let mapping = compile(
//!     &schema,
//!     "https://example.org/person",
//!     HashMap::new(),
//!     &MappingConfig::default(),
//! )
//! .unwrap();
//!
//! let value = mapping.to_value();
//! assert_eq!(value["properties"]["name"]["type"], "string");
//! assert_eq!(value["properties"]["tags"]["type"], "string");
//! assert_eq!(value["properties"]["born"]["type"], "integer");
//! assert_eq!(value["_all"]["enable"], true);
//! ```
//!
//! # Type Resolution
//!
//! | JSON Schema | Mapping |
//! |-------------|---------|
//! | `object` | nested `properties` |
//! | `array` | type of its `items` |
//! | `string`, `number`, `integer`, `boolean` | configured type (see [`MappingConfig`]) |
//! | `enum` without `type` | inferred from the enum values |
//! | `patternProperties`, `additionalProperties` other than `false` | rejected |

mod compiler;
mod config;
mod error;
mod loader;
mod resolver;
mod templating;
mod types;

pub use compiler::{compile, compile_with_context};
pub use config::{ConfigDocument, MappingConfig, MappingConfigBuilder, TypeEntry, TypeRecord};
pub use error::{CompileError, ConfigError, ErrorKind, ResolveError, TemplateError};
pub use loader::{load_document, load_document_str, navigate_fragment};
pub use resolver::{
    join_uri, schema_base_uri, schema_id, DefaultFetcher, DocumentFetcher, ResolutionContext,
    ScopeGuard,
};
pub use templating::{
    materialize, serialize, serialize_document, strip_nulls, DEFAULT_TYPE_NAME,
};
pub use types::{JsonType, MappingNode, MAPPINGS_KEY};

#[cfg(feature = "remote")]
pub use loader::load_document_url;
