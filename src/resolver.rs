//! Reference resolution for JSON Schema `$ref` and `id`.
//!
//! A [`ResolutionContext`] holds the documents known for one compilation (the
//! root schema plus a caller-supplied store), a stack of resolution scopes
//! driven by nested `id` keywords, and the references currently being
//! expanded. Documents missing from the store are obtained through a
//! [`DocumentFetcher`] and cached.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::path::Path;

use serde_json::Value;
use url::Url;

use crate::error::{CompileError, ResolveError};
use crate::loader::{load_document, navigate_fragment};

#[cfg(feature = "remote")]
use crate::loader::load_document_url;

/// Source of external schema documents.
pub trait DocumentFetcher {
    /// Fetch the document at `uri` (an absolute URI without fragment).
    fn fetch(&self, uri: &str) -> Result<Value, ResolveError>;
}

impl<F> DocumentFetcher for F
where
    F: Fn(&str) -> Result<Value, ResolveError>,
{
    fn fetch(&self, uri: &str) -> Result<Value, ResolveError> {
        self(uri)
    }
}

/// Fetches `file://` documents from disk and, with the `remote` feature,
/// `http(s)://` documents over the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFetcher;

impl DocumentFetcher for DefaultFetcher {
    fn fetch(&self, uri: &str) -> Result<Value, ResolveError> {
        let url = Url::parse(uri).map_err(|e| ResolveError::InvalidUri {
            uri: uri.to_string(),
            message: e.to_string(),
        })?;

        match url.scheme() {
            "file" => {
                let path = url.to_file_path().map_err(|()| ResolveError::InvalidUri {
                    uri: uri.to_string(),
                    message: "not a local file path".to_string(),
                })?;
                load_document(&path)
            }
            #[cfg(feature = "remote")]
            "http" | "https" => load_document_url(uri),
            scheme => Err(ResolveError::UnsupportedScheme {
                uri: uri.to_string(),
                scheme: scheme.to_string(),
            }),
        }
    }
}

/// Reference resolver for a single compilation.
pub struct ResolutionContext {
    base: String,
    scopes: Vec<String>,
    store: HashMap<String, Value>,
    active: Vec<String>,
    fetcher: Box<dyn DocumentFetcher>,
}

impl ResolutionContext {
    /// Create a resolver rooted at `base_uri`.
    ///
    /// `referrer` (the root schema) is registered under `base_uri`; `store`
    /// maps URIs of already known documents to their content. Store keys are
    /// compared without their fragment.
    pub fn new(base_uri: &str, referrer: &Value, store: HashMap<String, Value>) -> Self {
        let mut store: HashMap<String, Value> = store
            .into_iter()
            .map(|(uri, document)| (document_key(&uri), document))
            .collect();
        store.insert(document_key(base_uri), referrer.clone());

        Self {
            base: canonical_uri(base_uri),
            scopes: Vec::new(),
            store,
            active: Vec::new(),
            fetcher: Box::new(DefaultFetcher),
        }
    }

    /// Replace the fetcher used for documents missing from the store.
    pub fn with_fetcher(mut self, fetcher: impl DocumentFetcher + 'static) -> Self {
        self.fetcher = Box::new(fetcher);
        self
    }

    pub fn base_uri(&self) -> &str {
        &self.base
    }

    /// The URI relative references are currently resolved against.
    pub fn resolution_scope(&self) -> &str {
        self.scopes.last().unwrap_or(&self.base)
    }

    /// Number of scopes pushed on top of the base URI.
    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    /// Push `scope`, resolved against the current scope.
    pub fn push_scope(&mut self, scope: &str) {
        let joined = join_uri(self.resolution_scope(), scope);
        tracing::trace!(scope = %joined, "push resolution scope");
        self.scopes.push(joined);
    }

    /// Pop the innermost scope. The base URI is never popped.
    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    /// Whether the document at `uri` is already known.
    pub fn is_cached(&self, uri: &str) -> bool {
        self.store.contains_key(&document_key(uri))
    }

    /// Dereference `reference` against the current scope.
    ///
    /// Returns the absolute URI of the target along with a copy of it.
    /// Documents that are not yet known are fetched and cached.
    pub fn resolve(&mut self, reference: &str) -> Result<(String, Value), ResolveError> {
        let uri = join_uri(self.resolution_scope(), reference);
        let (document_uri, fragment) = split_fragment(&uri);

        let document = match self.store.entry(document_uri.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                tracing::debug!(uri = document_uri, "fetching external schema");
                entry.insert(self.fetcher.fetch(document_uri)?)
            }
        };
        let target = navigate_fragment(document, fragment)?.clone();

        Ok((uri, target))
    }

    /// Open a guard that undoes every scope and reference it records when
    /// dropped.
    pub fn enter(&mut self) -> ScopeGuard<'_> {
        ScopeGuard {
            context: self,
            scopes: 0,
            references: 0,
        }
    }
}

/// Balanced access to a [`ResolutionContext`].
///
/// Scopes pushed and references entered through the guard are released when
/// it goes out of scope, including on early return with an error.
pub struct ScopeGuard<'a> {
    context: &'a mut ResolutionContext,
    scopes: usize,
    references: usize,
}

impl ScopeGuard<'_> {
    pub fn push_scope(&mut self, scope: &str) {
        self.context.push_scope(scope);
        self.scopes += 1;
    }

    /// Mark `uri` as being expanded.
    ///
    /// Returns `false` if it is already being expanded further up, which
    /// means the schema refers back to itself.
    pub fn enter_reference(&mut self, uri: &str) -> bool {
        if self.context.active.iter().any(|active| active == uri) {
            return false;
        }
        self.context.active.push(uri.to_string());
        self.references += 1;
        true
    }
}

impl Deref for ScopeGuard<'_> {
    type Target = ResolutionContext;

    fn deref(&self) -> &Self::Target {
        &*self.context
    }
}

impl DerefMut for ScopeGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.context
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        for _ in 0..self.scopes {
            self.context.pop_scope();
        }
        let keep = self.context.active.len().saturating_sub(self.references);
        self.context.active.truncate(keep);
    }
}

/// Identifier declared by a schema node (`id`, or `$id` in later drafts).
pub fn schema_id(schema: &Value) -> Option<&str> {
    schema
        .get("id")
        .or_else(|| schema.get("$id"))
        .and_then(Value::as_str)
}

/// Determine the base URI of a top-level schema.
///
/// Uses the schema's own `id`; otherwise the `file://` URI of `source`.
///
/// # Errors
///
/// Returns `CompileError::MissingIdentity` when the schema has no `id` and
/// was not read from an existing file.
pub fn schema_base_uri(schema: &Value, source: Option<&Path>) -> Result<String, CompileError> {
    if let Some(id) = schema_id(schema) {
        return Ok(id.to_string());
    }

    let Some(path) = source else {
        return Err(CompileError::MissingIdentity {
            source_name: "<stdin>".to_string(),
        });
    };

    path.canonicalize()
        .ok()
        .and_then(|absolute| Url::from_file_path(absolute).ok())
        .map(String::from)
        .ok_or_else(|| CompileError::MissingIdentity {
            source_name: path.display().to_string(),
        })
}

/// Resolve `reference` against `base`.
///
/// Absolute bases follow RFC 3986. Bases that are not absolute URIs (such as
/// a bare `schema#`) fall back to a plain path join so fragment references
/// still work.
pub fn join_uri(base: &str, reference: &str) -> String {
    if let Ok(absolute) = Url::parse(reference) {
        return absolute.into();
    }
    if let Ok(joined) = Url::parse(base).and_then(|base| base.join(reference)) {
        return joined.into();
    }

    let (base_document, _) = split_fragment(base);
    if reference.is_empty() {
        return base_document.to_string();
    }
    if reference.starts_with('#') {
        return format!("{base_document}{reference}");
    }
    match base_document.rfind('/') {
        Some(i) => format!("{}{}", &base_document[..=i], reference),
        None => reference.to_string(),
    }
}

fn split_fragment(uri: &str) -> (&str, &str) {
    match uri.find('#') {
        Some(i) => uri.split_at(i),
        None => (uri, ""),
    }
}

fn canonical_uri(uri: &str) -> String {
    Url::parse(uri)
        .map(String::from)
        .unwrap_or_else(|_| uri.to_string())
}

fn document_key(uri: &str) -> String {
    let canonical = canonical_uri(uri);
    split_fragment(&canonical).0.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn no_fetch(uri: &str) -> Result<Value, ResolveError> {
        Err(ResolveError::UnsupportedScheme {
            uri: uri.to_string(),
            scheme: "test".to_string(),
        })
    }

    #[test]
    fn join_absolute_base() {
        assert_eq!(
            join_uri("https://example.org/schemas/root.json", "other.json#/a"),
            "https://example.org/schemas/other.json#/a"
        );
        assert_eq!(
            join_uri("https://example.org/root.json#/x", "#/definitions/y"),
            "https://example.org/root.json#/definitions/y"
        );
        assert_eq!(
            join_uri("https://example.org/root.json", "https://other.org/s.json"),
            "https://other.org/s.json"
        );
    }

    #[test]
    fn join_relative_base() {
        assert_eq!(join_uri("S#", "#/properties/n"), "S#/properties/n");
        assert_eq!(join_uri("S#", "S#"), "S#");
        assert_eq!(join_uri("dir/root#", "sub.json#/a"), "dir/sub.json#/a");
        assert_eq!(join_uri("root.json#/a", ""), "root.json");
    }

    #[test]
    fn resolve_local_fragment() {
        let schema = json!({
            "properties": { "orig": { "type": "string" } }
        });
        let mut context = ResolutionContext::new("https://example.org/root#", &schema, HashMap::new());

        let (uri, target) = context.resolve("#/properties/orig").unwrap();
        assert_eq!(uri, "https://example.org/root#/properties/orig");
        assert_eq!(target, json!({ "type": "string" }));
    }

    #[test]
    fn resolve_from_store_ignores_fragment_in_key() {
        let schema = json!({});
        let mut store = HashMap::new();
        store.insert(
            "https://example.org/ext.json#".to_string(),
            json!({ "definitions": { "d": { "type": "boolean" } } }),
        );
        let mut context = ResolutionContext::new("https://example.org/root.json", &schema, store)
            .with_fetcher(no_fetch);

        assert!(context.is_cached("https://example.org/ext.json"));
        let (_, target) = context.resolve("ext.json#/definitions/d").unwrap();
        assert_eq!(target["type"], "boolean");
    }

    #[test]
    fn resolve_fetches_and_caches() {
        use std::cell::Cell;
        use std::rc::Rc;

        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let fetcher = move |uri: &str| -> Result<Value, ResolveError> {
            counter.set(counter.get() + 1);
            assert_eq!(uri, "https://example.org/ext.json");
            Ok(json!({ "definitions": { "d": { "type": "integer" } } }))
        };

        let schema = json!({});
        let mut context = ResolutionContext::new("https://example.org/root.json", &schema, HashMap::new())
            .with_fetcher(fetcher);

        context.resolve("ext.json#/definitions/d").unwrap();
        context.resolve("ext.json#/definitions/d").unwrap();
        assert_eq!(calls.get(), 1);
        assert!(context.is_cached("https://example.org/ext.json"));
    }

    #[test]
    fn resolve_fetch_failure() {
        let schema = json!({});
        let mut context = ResolutionContext::new("https://example.org/root.json", &schema, HashMap::new())
            .with_fetcher(no_fetch);

        let result = context.resolve("missing.json#");
        assert!(matches!(result, Err(ResolveError::UnsupportedScheme { .. })));
    }

    #[test]
    fn default_fetcher_reads_files() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"definitions": {{"d": {{"type": "string"}}}}}}"#).unwrap();
        let uri = String::from(Url::from_file_path(file.path()).unwrap());

        let document = DefaultFetcher.fetch(&uri).unwrap();
        assert_eq!(document["definitions"]["d"]["type"], "string");
    }

    #[test]
    fn default_fetcher_rejects_unknown_scheme() {
        let result = DefaultFetcher.fetch("ftp://example.org/schema.json");
        assert!(matches!(
            result,
            Err(ResolveError::UnsupportedScheme { scheme, .. }) if scheme == "ftp"
        ));
    }

    #[test]
    fn scope_changes_relative_resolution() {
        let schema = json!({});
        let mut store = HashMap::new();
        store.insert(
            "https://example.org/nested/ext.json".to_string(),
            json!({ "type": "string" }),
        );
        let mut context = ResolutionContext::new("https://example.org/root.json", &schema, store);

        context.push_scope("nested/");
        assert_eq!(context.resolution_scope(), "https://example.org/nested/");
        let (uri, _) = context.resolve("ext.json").unwrap();
        assert_eq!(uri, "https://example.org/nested/ext.json");
        context.pop_scope();
        assert_eq!(context.resolution_scope(), "https://example.org/root.json");
    }

    #[test]
    fn guard_releases_on_drop() {
        let schema = json!({});
        let mut context = ResolutionContext::new("https://example.org/root.json", &schema, HashMap::new());

        {
            let mut outer = context.enter();
            outer.push_scope("a/");
            assert!(outer.enter_reference("https://example.org/a/x.json"));
            {
                let mut inner = outer.enter();
                inner.push_scope("b/");
                assert_eq!(inner.scope_depth(), 2);
                assert!(!inner.enter_reference("https://example.org/a/x.json"));
                assert!(inner.enter_reference("https://example.org/a/y.json"));
            }
            assert_eq!(outer.scope_depth(), 1);
            assert!(outer.enter_reference("https://example.org/a/y.json"));
        }

        assert_eq!(context.scope_depth(), 0);
        assert!(context.enter().enter_reference("https://example.org/a/x.json"));
    }

    #[test]
    fn base_uri_from_id() {
        let schema = json!({ "id": "https://example.org/root#" });
        assert_eq!(
            schema_base_uri(&schema, None).unwrap(),
            "https://example.org/root#"
        );
    }

    #[test]
    fn base_uri_from_file() {
        let file = NamedTempFile::new().unwrap();
        let uri = schema_base_uri(&json!({}), Some(file.path())).unwrap();
        assert!(uri.starts_with("file:///"));
    }

    #[test]
    fn base_uri_missing() {
        let err = schema_base_uri(&json!({ "type": "object" }), None).unwrap_err();
        assert!(matches!(err, CompileError::MissingIdentity { .. }));
    }
}
