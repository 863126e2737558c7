//! Mapping templates.
//!
//! A mapping is printed as a Jinja template in which every object node and
//! every `properties` collection sits in its own named block. An override
//! template can then `{% extends %}` the generated one and replace any block,
//! usually calling `{{ super() }}` first and appending fields. Setting a key
//! to `null` in an override removes it from the final mapping.
//!
//! Block names for a root named `person`:
//!
//! | Location | Block |
//! |----------|-------|
//! | root node | `person` |
//! | root properties | `person__PROPERTIES__` |
//! | field `address` | `person__address` |
//! | fields of `address` | `person__address__PROPERTIES__` |
//!
//! Characters that cannot appear in an identifier are written as
//! `_x<hex>_`, so field `first-name` gets block `person__first_x2d_name`.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::PathBuf;

use include_dir::Dir;
use minijinja::{context, AutoEscape, Environment};
use serde_json::{Map, Value};

use crate::error::TemplateError;
use crate::types::MAPPINGS_KEY;

/// Root block name used when none is given.
pub const DEFAULT_TYPE_NAME: &str = "type";

const PROPERTIES_BLOCK_SUFFIX: &str = "__PROPERTIES__";

const TEMPLATE_DELIMITERS: [&str; 3] = ["{{", "{%", "{#"];

/// Print a mapping as a block-annotated template.
///
/// `type_name` is the root block name and prefixes every nested block name.
///
/// # Errors
///
/// Returns `TemplateError::DuplicateBlock` when two locations of the mapping
/// encode to the same block name, and `TemplateError::UnrepresentableText`
/// for keys or values that cannot be kept literal in a template.
pub fn serialize(
    mapping: &Map<String, Value>,
    type_name: &str,
    indent: usize,
) -> Result<String, TemplateError> {
    let mut writer = TemplateWriter::new(indent);
    writer.mapping(mapping, type_name, "")?;
    Ok(writer.out)
}

/// Print a mapping document, which may wrap several named mappings under
/// `"mappings"`.
///
/// Each wrapped mapping is printed with its own name as root block name. A
/// `type_name` overrides that name, which is only allowed for a single
/// wrapped mapping. Plain documents use `type_name` or
/// [`DEFAULT_TYPE_NAME`].
///
/// # Errors
///
/// Returns `TemplateError::AmbiguousTypeName` when a type name is given for
/// several wrapped mappings, and `TemplateError::NotAnObject` for documents
/// that are not JSON objects. Errors of [`serialize`] are passed through.
pub fn serialize_document(
    document: &Value,
    type_name: Option<&str>,
    indent: usize,
) -> Result<String, TemplateError> {
    let mapping = as_object(document, "mapping document")?;

    let Some(mappings) = mapping.get(MAPPINGS_KEY) else {
        return serialize(mapping, type_name.unwrap_or(DEFAULT_TYPE_NAME), indent);
    };

    let mappings = as_object(mappings, "\"mappings\"")?;
    if type_name.is_some() && mappings.len() > 1 {
        return Err(TemplateError::AmbiguousTypeName {
            count: mappings.len(),
        });
    }

    let pad = " ".repeat(indent);
    let pad2 = " ".repeat(indent * 2);
    let mut writer = TemplateWriter::new(indent);
    writer.out = format!("{{\n{pad}\"{MAPPINGS_KEY}\": {{\n");

    let last = mappings.len().saturating_sub(1);
    for (idx, (name, sub_mapping)) in mappings.iter().enumerate() {
        let sub_mapping = as_object(sub_mapping, &format!("mapping \"{name}\""))?;
        let key = literal(&Value::from(name.as_str()))?;
        writer.out.push_str(&format!("{pad2}{key}:"));
        writer.mapping(sub_mapping, type_name.unwrap_or(name), &pad2)?;
        writer.out.push_str(if idx < last { ",\n" } else { "\n" });
    }

    writer.out.push_str(&format!("{pad}}}\n}}"));
    Ok(writer.out)
}

/// Render a template and parse the result back into a mapping.
///
/// Templates referenced by `{% extends %}` are looked up first in the
/// embedded `packages`, then in `search_paths`. A search path is either a
/// directory holding templates or a single template file. Keys set to `null`
/// are removed from the result at every depth.
///
/// # Errors
///
/// Returns `TemplateError::Render` if the template (or one it extends) fails
/// to load or render, and `TemplateError::InvalidJson` if the output isn't
/// JSON.
pub fn materialize(
    template: &str,
    search_paths: &[PathBuf],
    packages: &[&'static Dir<'static>],
) -> Result<Value, TemplateError> {
    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| AutoEscape::None);

    let search_paths = search_paths.to_vec();
    let packages = packages.to_vec();
    env.set_loader(move |name| load_template(name, &packages, &search_paths));

    let rendered = env.render_str(template, context! {})?;
    tracing::trace!(%rendered, "rendered mapping template");

    let mapping: Value =
        serde_json::from_str(&rendered).map_err(|source| TemplateError::InvalidJson { source })?;
    Ok(strip_nulls(mapping))
}

/// Remove every object key whose value is `null`, recursively.
///
/// Objects inside arrays are cleaned too; `null` array elements are kept.
pub fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_nulls).collect()),
        other => other,
    }
}

/// Accumulates template text and the block names used so far.
struct TemplateWriter {
    out: String,
    step: String,
    blocks: HashSet<String>,
}

impl TemplateWriter {
    fn new(indent: usize) -> Self {
        Self {
            out: String::new(),
            step: " ".repeat(indent),
            blocks: HashSet::new(),
        }
    }

    fn mapping(
        &mut self,
        mapping: &Map<String, Value>,
        type_name: &str,
        start_indent: &str,
    ) -> Result<(), TemplateError> {
        self.out.push_str("{\n");
        let inner = format!("{start_indent}{}", self.step);
        self.node(mapping, &block_name(type_name), &inner)?;
        self.out.push_str(start_indent);
        self.out.push('}');
        Ok(())
    }

    fn open_block(&mut self, block: &str, start_indent: &str) -> Result<(), TemplateError> {
        if !self.blocks.insert(block.to_string()) {
            return Err(TemplateError::DuplicateBlock {
                name: block.to_string(),
            });
        }
        self.out
            .push_str(&format!("{start_indent}{{% block {block} %}}\n"));
        Ok(())
    }

    fn node(
        &mut self,
        mapping: &Map<String, Value>,
        block: &str,
        start_indent: &str,
    ) -> Result<(), TemplateError> {
        self.open_block(block, start_indent)?;

        let last = mapping.len().saturating_sub(1);
        for (idx, (key, value)) in mapping.iter().enumerate() {
            match (key.as_str(), value) {
                ("properties", Value::Object(properties)) => {
                    self.properties(properties, block, start_indent)?;
                }
                _ => {
                    let key = literal(&Value::from(key.as_str()))?;
                    let value = literal(value)?;
                    self.out.push_str(&format!("{start_indent}{key}: {value}"));
                }
            }
            self.out.push_str(if idx < last { ",\n" } else { "\n" });
        }

        self.out
            .push_str(&format!("{start_indent}{{% endblock %}}\n"));
        Ok(())
    }

    fn properties(
        &mut self,
        properties: &Map<String, Value>,
        block: &str,
        start_indent: &str,
    ) -> Result<(), TemplateError> {
        let inner = format!("{start_indent}{}", self.step);
        let field_indent = format!("{inner}{}", self.step);

        self.out
            .push_str(&format!("{start_indent}\"properties\": {{\n"));
        self.open_block(&format!("{block}{PROPERTIES_BLOCK_SUFFIX}"), &inner)?;

        let last = properties.len().saturating_sub(1);
        for (idx, (name, field)) in properties.iter().enumerate() {
            let key = literal(&Value::from(name.as_str()))?;
            match field {
                Value::Object(field) => {
                    self.out.push_str(&format!("{inner}{key}: {{\n"));
                    let field_block = format!("{block}__{}", block_name(name));
                    self.node(field, &field_block, &field_indent)?;
                    self.out.push_str(&format!("{inner}}}"));
                }
                other => {
                    let value = literal(other)?;
                    self.out.push_str(&format!("{inner}{key}: {value}"));
                }
            }
            self.out.push_str(if idx < last { ",\n" } else { "\n" });
        }

        self.out.push_str(&format!("{inner}{{% endblock %}}\n"));
        self.out.push_str(&format!("{start_indent}}}"));
        Ok(())
    }
}

/// JSON text for `value`, kept out of template evaluation when it contains
/// template delimiters.
fn literal(value: &Value) -> Result<String, TemplateError> {
    let text = value.to_string();
    if !TEMPLATE_DELIMITERS.iter().any(|d| text.contains(d)) {
        return Ok(text);
    }
    if text.contains("endraw") {
        return Err(TemplateError::UnrepresentableText { text });
    }
    Ok(format!("{{% raw %}}{text}{{% endraw %}}"))
}

/// Encode a name as a template identifier.
///
/// ASCII letters, digits and `_` are kept, except a leading digit and a `_`
/// followed by `x`. Every other character becomes `_x<hex code point>_`, so
/// distinct names always give distinct identifiers.
fn block_name(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    let mut chars = name.chars().peekable();
    while let Some(c) = chars.next() {
        let keep = match c {
            '_' => chars.peek() != Some(&'x'),
            '0'..='9' => !encoded.is_empty(),
            c => c.is_ascii_alphabetic(),
        };
        if keep {
            encoded.push(c);
        } else {
            encoded.push_str(&format!("_x{:x}_", u32::from(c)));
        }
    }
    encoded
}

fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>, TemplateError> {
    value.as_object().ok_or_else(|| TemplateError::NotAnObject {
        what: what.to_string(),
    })
}

fn load_template(
    name: &str,
    packages: &[&'static Dir<'static>],
    search_paths: &[PathBuf],
) -> Result<Option<String>, minijinja::Error> {
    for package in packages {
        if let Some(source) = package.get_file(name).and_then(|file| file.contents_utf8()) {
            return Ok(Some(source.to_string()));
        }
    }

    for path in search_paths {
        let candidate = if path.is_dir() {
            path.join(name)
        } else if path.file_name() == Some(OsStr::new(name)) {
            path.clone()
        } else {
            continue;
        };

        match std::fs::read_to_string(&candidate) {
            Ok(source) => {
                tracing::debug!(template = name, path = %candidate.display(), "loaded template");
                return Ok(Some(source));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(minijinja::Error::new(
                    minijinja::ErrorKind::InvalidOperation,
                    format!("cannot read template {}", candidate.display()),
                )
                .with_source(e))
            }
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn serialize_layout() {
        let mapping = object(json!({
            "date_detection": true,
            "properties": {
                "name": { "type": "string" },
                "age": { "type": "integer" }
            }
        }));

        let expected = [
            "{",
            "  {% block person %}",
            "  \"date_detection\": true,",
            "  \"properties\": {",
            "    {% block person__PROPERTIES__ %}",
            "    \"name\": {",
            "      {% block person__name %}",
            "      \"type\": \"string\"",
            "      {% endblock %}",
            "    },",
            "    \"age\": {",
            "      {% block person__age %}",
            "      \"type\": \"integer\"",
            "      {% endblock %}",
            "    }",
            "    {% endblock %}",
            "  }",
            "  {% endblock %}",
            "}",
        ]
        .join("\n");
        assert_eq!(serialize(&mapping, "person", 2).unwrap(), expected);
    }

    #[test]
    fn nested_block_names() {
        let mapping = object(json!({
            "properties": {
                "address": {
                    "type": "object",
                    "properties": { "city": { "type": "string" } }
                }
            }
        }));
        let template = serialize(&mapping, "person", 4).unwrap();

        for block in [
            "{% block person %}",
            "{% block person__PROPERTIES__ %}",
            "{% block person__address %}",
            "{% block person__address__PROPERTIES__ %}",
            "{% block person__address__city %}",
        ] {
            assert!(template.contains(block), "missing {block} in {template}");
        }
    }

    #[test]
    fn block_names_are_identifiers() {
        assert_eq!(block_name("plain_name1"), "plain_name1");
        assert_eq!(block_name("first-name"), "first_x2d_name");
        assert_eq!(block_name("a.b"), "a_x2e_b");
        assert_eq!(block_name("名前"), "_x540d__x524d_");
        assert_eq!(block_name("1st"), "_x31_st");
        assert_eq!(block_name("max_x"), "max_x5f_x");
    }

    #[test]
    fn block_names_are_distinct() {
        let names = ["first-name", "first_name", "first_x2d_name", "名前", "住所", "_x", "x"];
        let encoded: HashSet<String> = names.iter().map(|name| block_name(name)).collect();
        assert_eq!(encoded.len(), names.len());
    }

    #[test]
    fn separator_collision_is_rejected() {
        let mapping = object(json!({
            "properties": {
                "a__b": { "type": "string" },
                "a": { "type": "object", "properties": { "b": { "type": "string" } } }
            }
        }));
        let result = serialize(&mapping, "t", 2);
        assert!(matches!(
            result,
            Err(TemplateError::DuplicateBlock { name }) if name == "t__a__b"
        ));
    }

    #[test]
    fn template_syntax_in_values_is_literal() {
        let mapping = json!({
            "properties": {
                "{{ key }}": { "type": "string", "null_value": "{{ x }}", "note": "{# c #}" }
            }
        });
        let template = serialize(mapping.as_object().unwrap(), "t", 2).unwrap();
        assert!(template.contains("{% raw %}\"{{ x }}\"{% endraw %}"));

        let rendered = Environment::new().render_str(&template, context! {}).unwrap();
        let parsed: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed, mapping);
    }

    #[test]
    fn raw_terminator_in_value_is_rejected() {
        let mapping = object(json!({ "note": "{% endraw %}" }));
        assert!(matches!(
            serialize(&mapping, "t", 2),
            Err(TemplateError::UnrepresentableText { .. })
        ));
    }

    #[test]
    fn serialize_renders_to_same_mapping() {
        let mapping = json!({
            "_all": { "enable": true },
            "numeric_detection": true,
            "date_detection": true,
            "properties": {
                "attr1": { "type": "string" },
                "attr2": { "type": "boolean" }
            }
        });
        let template = serialize(mapping.as_object().unwrap(), "mytype", 2).unwrap();
        let rendered = Environment::new().render_str(&template, context! {}).unwrap();
        let parsed: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed, mapping);
    }

    #[test]
    fn serialize_document_plain_uses_default_name() {
        let template = serialize_document(&json!({ "properties": {} }), None, 2).unwrap();
        assert!(template.contains("{% block type %}"));
        assert!(template.contains("{% block type__PROPERTIES__ %}"));
    }

    #[test]
    fn serialize_document_multi_type() {
        let document = json!({
            "mappings": {
                "person": { "properties": { "name": { "type": "string" } } },
                "company": { "properties": { "siret": { "type": "string" } } }
            }
        });
        let template = serialize_document(&document, None, 2).unwrap();
        assert!(template.contains("{% block person__name %}"));
        assert!(template.contains("{% block company__siret %}"));

        let rendered = Environment::new().render_str(&template, context! {}).unwrap();
        let parsed: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed, document);
    }

    #[test]
    fn serialize_document_single_type_rename() {
        let document = json!({
            "mappings": { "person": { "properties": { "name": { "type": "string" } } } }
        });
        let template = serialize_document(&document, Some("record"), 2).unwrap();
        assert!(template.contains("\"person\":"));
        assert!(template.contains("{% block record__name %}"));
    }

    #[test]
    fn serialize_document_rejects_ambiguous_name() {
        let document = json!({ "mappings": { "a": {}, "b": {} } });
        let result = serialize_document(&document, Some("record"), 2);
        assert!(matches!(
            result,
            Err(TemplateError::AmbiguousTypeName { count: 2 })
        ));
    }

    #[test]
    fn serialize_document_rejects_non_object() {
        let result = serialize_document(&json!([1, 2]), None, 2);
        assert!(matches!(result, Err(TemplateError::NotAnObject { .. })));
    }

    #[test]
    fn strip_nulls_at_every_depth() {
        let cleaned = strip_nulls(json!({
            "a": null,
            "b": { "c": null, "d": 1 },
            "e": [{ "f": null, "g": 2 }, null]
        }));
        assert_eq!(
            cleaned,
            json!({ "b": { "d": 1 }, "e": [{ "g": 2 }, null] })
        );
    }

    #[test]
    fn materialize_plain_template() {
        let mapping = materialize(r#"{"a": 1, "b": null}"#, &[], &[]).unwrap();
        assert_eq!(mapping, json!({ "a": 1 }));
    }

    #[test]
    fn materialize_missing_parent() {
        let result = materialize(r#"{% extends "absent.json" %}"#, &[], &[]);
        assert!(matches!(result, Err(TemplateError::Render(_))));
    }

    #[test]
    fn materialize_invalid_json() {
        let result = materialize("not json", &[], &[]);
        assert!(matches!(result, Err(TemplateError::InvalidJson { .. })));
    }
}
