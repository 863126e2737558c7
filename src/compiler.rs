//! Schema compilation - turns a JSON Schema into a search index mapping.
//!
//! The compiler walks the schema recursively and writes into a mutable
//! [`MappingNode`]. Several schema locations may contribute to the same
//! output node (composition branches, tuple array items, schema
//! dependencies, repeated definitions of a field); they are merged as long
//! as they agree on the node's type.

use std::borrow::Cow;
use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::{json, Map, Value};

use crate::config::MappingConfig;
use crate::error::CompileError;
use crate::resolver::{schema_id, ResolutionContext};
use crate::types::{JsonType, MappingNode, COMPOSITION_KEYWORDS, OBJECT_TYPE};

/// Compile a JSON Schema into a mapping.
///
/// `base_uri` identifies `schema` for reference resolution and is used as the
/// root of error paths. `store` maps URIs of known external schemas to their
/// content; other external references are fetched.
///
/// # Errors
///
/// Returns `CompileError` for unsupported constructs, fields whose type cannot
/// be inferred, conflicting redefinitions and unresolvable references.
pub fn compile(
    schema: &Value,
    base_uri: &str,
    store: HashMap<String, Value>,
    config: &MappingConfig,
) -> Result<MappingNode, CompileError> {
    let mut context = ResolutionContext::new(base_uri, schema, store);
    compile_with_context(schema, &mut context, config)
}

/// Compile a JSON Schema using an existing resolution context.
pub fn compile_with_context(
    schema: &Value,
    context: &mut ResolutionContext,
    config: &MappingConfig,
) -> Result<MappingNode, CompileError> {
    let mut root = root_node(config);
    let path = context.base_uri().to_string();
    tracing::debug!(base = %path, "compiling schema");
    compile_node(schema, path, context, config, &mut root)?;
    Ok(root)
}

/// Empty mapping root carrying the detection flags.
fn root_node(config: &MappingConfig) -> MappingNode {
    let mut extra = Map::new();
    extra.insert("_all".to_string(), json!({ "enable": config.all_field() }));
    extra.insert(
        "numeric_detection".to_string(),
        Value::Bool(config.numeric_detection()),
    );
    extra.insert(
        "date_detection".to_string(),
        Value::Bool(config.date_detection()),
    );

    MappingNode {
        field_type: None,
        extra,
        properties: Some(IndexMap::new()),
    }
}

fn compile_node(
    schema: &Value,
    mut path: String,
    context: &mut ResolutionContext,
    config: &MappingConfig,
    target: &mut MappingNode,
) -> Result<(), CompileError> {
    let mut scope = context.enter();
    if let Some(id) = schema_id(schema) {
        scope.push_scope(id);
    }

    // Follow reference chains; each hop also moves the resolution scope to
    // the referenced document.
    let mut schema = Cow::Borrowed(schema);
    while let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
        let reference = reference.to_string();
        let (uri, resolved) =
            scope
                .resolve(&reference)
                .map_err(|source| CompileError::Reference {
                    reference: reference.clone(),
                    source,
                })?;
        if !scope.enter_reference(&uri) {
            return Err(CompileError::CircularReference { path, reference });
        }
        tracing::debug!(reference = %reference, uri = %uri, "followed reference");
        scope.push_scope(&uri);
        path = reference;
        schema = Cow::Owned(resolved);
    }

    if schema.get("patternProperties").is_some() {
        return Err(CompileError::PatternProperties { path });
    }
    if has_additional_properties(&schema) {
        return Err(CompileError::AdditionalProperties { path });
    }

    // Composition: every branch extends the same target
    let keywords: Vec<&str> = COMPOSITION_KEYWORDS
        .iter()
        .copied()
        .filter(|keyword| schema.get(keyword).is_some())
        .collect();
    if !keywords.is_empty() {
        for keyword in keywords {
            let Some(branches) = schema[keyword].as_array() else {
                return Err(CompileError::CompositionNotArray {
                    path,
                    keyword: keyword.to_string(),
                });
            };
            for (i, branch) in branches.iter().enumerate() {
                compile_node(
                    branch,
                    format!("{path}/{keyword}[{i}]"),
                    &mut scope,
                    config,
                    target,
                )?;
            }
        }
        return Ok(());
    }

    let json_type = schema_type(&schema, &path)?;

    if json_type == "array" {
        // Arrays are unwrapped: only the item shape reaches the mapping
        let path = format!("{path}/items");
        return match schema.get("items") {
            Some(Value::Array(items)) if !items.is_empty() => {
                for (i, item) in items.iter().enumerate() {
                    compile_node(item, format!("{path}[{i}]"), &mut scope, config, target)?;
                }
                Ok(())
            }
            Some(item @ Value::Object(_)) => compile_node(item, path, &mut scope, config, target),
            _ => Err(CompileError::MissingItems { path }),
        };
    }

    let resolved = if json_type == OBJECT_TYPE {
        None
    } else {
        let parsed = JsonType::parse(&json_type).ok_or_else(|| CompileError::UnsupportedType {
            path: path.clone(),
            name: json_type.clone(),
        })?;
        let format = schema.get("format").and_then(Value::as_str);
        Some(config.resolve(parsed, format))
    };
    let es_type = resolved
        .as_ref()
        .map_or(OBJECT_TYPE, |entry| entry.es_type.as_str());

    if let Some(existing) = target.effective_type() {
        if existing != es_type {
            if target.is_root() {
                return Err(CompileError::RootType {
                    path,
                    found: es_type.to_string(),
                });
            }
            return Err(CompileError::TypeConflict {
                path,
                existing: existing.to_string(),
                found: es_type.to_string(),
            });
        }
    }

    // The root never gets a type key
    if target.properties.is_none() {
        target.field_type = Some(es_type.to_string());
    }

    let Some(entry) = resolved else {
        let properties = target.properties.get_or_insert_with(IndexMap::new);
        if let Some(declared) = schema.get("properties").and_then(Value::as_object) {
            for (name, property) in declared {
                tracing::trace!(field = %name, path = %path, "merging field");
                let field = properties.entry(name.clone()).or_default();
                compile_node(
                    property,
                    format!("{path}/{name}"),
                    &mut scope,
                    config,
                    field,
                )?;
            }
        }

        // Schema dependencies add their properties to this object
        if let Some(dependencies) = schema.get("dependencies").and_then(Value::as_object) {
            for (name, dependency) in dependencies {
                if dependency.is_object() {
                    compile_node(
                        dependency,
                        format!("{path}/dependencies[{name}]"),
                        &mut scope,
                        config,
                        target,
                    )?;
                }
            }
        }
        return Ok(());
    };

    for (key, value) in entry.props {
        if key == "type" || key == "properties" {
            continue;
        }
        target.extra.insert(key, value);
    }
    Ok(())
}

/// Effective JSON type of a schema node: its `type`, or `object` when it has
/// `properties`, or the type shared by all values of its `enum`.
fn schema_type(schema: &Value, path: &str) -> Result<String, CompileError> {
    match schema.get("type") {
        Some(Value::String(name)) if !name.is_empty() => Ok(name.clone()),
        Some(Value::Array(_)) => Err(CompileError::TypeArray {
            path: path.to_string(),
        }),
        Some(Value::String(_)) | Some(Value::Null) | None => {
            if schema.get("properties").is_some() {
                Ok(OBJECT_TYPE.to_string())
            } else if let Some(values) = schema.get("enum") {
                guess_enum_type(values, path).map(str::to_string)
            } else {
                Err(CompileError::TypeInference {
                    path: path.to_string(),
                    reason: "only fields with a \"type\", \"properties\" or an \"enum\" of \
                             strings or integers are supported"
                        .to_string(),
                })
            }
        }
        Some(other) => Err(CompileError::UnsupportedType {
            path: path.to_string(),
            name: other.to_string(),
        }),
    }
}

fn guess_enum_type(values: &Value, path: &str) -> Result<&'static str, CompileError> {
    let Some(values) = values.as_array() else {
        return Err(CompileError::TypeInference {
            path: path.to_string(),
            reason: "\"enum\" is not an array".to_string(),
        });
    };

    if values.iter().all(Value::is_string) {
        Ok("string")
    } else if values.iter().all(|v| v.is_i64() || v.is_u64()) {
        Ok("number")
    } else {
        Err(CompileError::TypeInference {
            path: path.to_string(),
            reason: format!(
                "mixed values in enum {} are not supported; only strings or integers \
                 can be used when \"type\" is not defined",
                Value::Array(values.clone())
            ),
        })
    }
}

/// Whether `additionalProperties` appears anywhere below `value` with
/// anything other than `false`.
fn has_additional_properties(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.iter().any(|(key, child)| {
            (key == "additionalProperties" && *child != Value::Bool(false))
                || has_additional_properties(child)
        }),
        Value::Array(items) => items.iter().any(has_additional_properties),
        _ => false,
    }
}
