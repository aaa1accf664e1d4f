//! Transform models and their builder.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::rules::pattern::{FieldPattern, PatternTable};
use crate::rules::predicate::Predicate;

/// Error raised by a field handler for a value it cannot convert.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

type HandlerFn =
    dyn Fn(&Value, &Map<String, Value>) -> Result<Map<String, Value>, HandlerError> + Send + Sync;

/// Pure function of (field value, output accumulated so far) to output fields.
#[derive(Clone)]
pub struct Handler(Arc<HandlerFn>);

impl Handler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value, &Map<String, Value>) -> Result<Map<String, Value>, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        Self(Arc::new(f))
    }

    /// Invoke the handler.
    ///
    /// # Errors
    ///
    /// Returns the handler's [`HandlerError`] unchanged.
    pub fn call(
        &self,
        value: &Value,
        output: &Map<String, Value>,
    ) -> Result<Map<String, Value>, HandlerError> {
        (self.0)(value, output)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler(..)")
    }
}

/// A named bundle of selection predicate, field handlers, ignored fields,
/// and default output fields.
///
/// Base composition is resolved at build time: the effective tables are
/// `base ∪ own`, with own entries winning on collision.
#[derive(Debug, Clone)]
pub struct TransformModel {
    name: String,
    base: Option<String>,
    predicate: Option<Predicate>,
    handlers: PatternTable<Handler>,
    ignored: PatternTable<()>,
    defaults: Map<String, Value>,
}

impl TransformModel {
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ModelBuilder {
        ModelBuilder {
            model: Self {
                name: name.into(),
                base: None,
                predicate: None,
                handlers: PatternTable::default(),
                ignored: PatternTable::default(),
                defaults: Map::new(),
            },
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn base_name(&self) -> Option<&str> {
        self.base.as_deref()
    }

    #[must_use]
    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }

    /// Models without a predicate only serve as bases.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.predicate.is_none()
    }

    #[must_use]
    pub fn handler_for(&self, code: &str) -> Option<&Handler> {
        self.handlers.lookup(code)
    }

    #[must_use]
    pub fn is_ignored(&self, code: &str) -> bool {
        self.ignored.contains(code)
    }

    #[must_use]
    pub fn defaults(&self) -> &Map<String, Value> {
        &self.defaults
    }

    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn ignored_count(&self) -> usize {
        self.ignored.len()
    }

    pub fn handler_patterns(&self) -> impl Iterator<Item = FieldPattern> + '_ {
        self.handlers.patterns()
    }
}

/// Builder for [`TransformModel`].
#[derive(Debug)]
pub struct ModelBuilder {
    model: TransformModel,
}

impl ModelBuilder {
    /// Inherit handlers, ignored fields, and defaults from `base`.
    ///
    /// Entries already declared on this builder are kept; later
    /// declarations override inherited ones.
    #[must_use]
    pub fn extends(mut self, base: &TransformModel) -> Self {
        self.model.base = Some(base.name.clone());
        self.model.handlers.inherit(&base.handlers);
        self.model.ignored.inherit(&base.ignored);
        for (key, value) in &base.defaults {
            self.model
                .defaults
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }

    #[must_use]
    pub fn when(mut self, predicate: Predicate) -> Self {
        self.model.predicate = Some(predicate);
        self
    }

    /// Register a handler, replacing any inherited handler or ignore entry
    /// for the same pattern.
    #[must_use]
    pub fn handle<F>(mut self, pattern: &str, f: F) -> Self
    where
        F: Fn(&Value, &Map<String, Value>) -> Result<Map<String, Value>, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        let pattern = FieldPattern::parse(pattern);
        self.model.ignored.remove(&pattern);
        self.model.handlers.insert(pattern, Handler::new(f));
        self
    }

    /// Ignore fields silently, replacing inherited handlers for the same
    /// patterns.
    #[must_use]
    pub fn ignore(mut self, patterns: &[&str]) -> Self {
        for raw in patterns {
            let pattern = FieldPattern::parse(raw);
            self.model.handlers.remove(&pattern);
            self.model.ignored.insert(pattern, ());
        }
        self
    }

    #[must_use]
    pub fn default_field(mut self, key: &str, value: Value) -> Self {
        self.model.defaults.insert(key.to_string(), value);
        self
    }

    #[must_use]
    pub fn build(self) -> TransformModel {
        self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn set(key: &'static str) -> impl Fn(&Value, &Map<String, Value>) -> Result<Map<String, Value>, HandlerError> {
        move |value, _| {
            let mut out = Map::new();
            out.insert(key.to_string(), value.clone());
            Ok(out)
        }
    }

    fn base() -> TransformModel {
        TransformModel::builder("document")
            .handle("245__a", set("title"))
            .handle("8564_*", set("file"))
            .ignore(&["001", "005"])
            .default_field("resource_type", json!("publication"))
            .default_field("access", json!({"record": "public"}))
            .build()
    }

    #[test]
    fn base_model_is_abstract() {
        let model = base();
        assert!(model.is_abstract());
        assert_eq!(model.handler_count(), 2);
        assert_eq!(model.ignored_count(), 2);
    }

    #[test]
    fn extends_composes_base_and_own() {
        let base = base();
        let book = TransformModel::builder("book")
            .extends(&base)
            .when(Predicate::tag("BOOK"))
            .handle("020__a", set("isbn"))
            .handle("245__a", set("book_title"))
            .default_field("resource_type", json!("publication-book"))
            .build();

        assert!(!book.is_abstract());
        assert_eq!(book.base_name(), Some("document"));
        assert_eq!(book.handler_count(), 3);
        assert!(book.handler_for("8564_u").is_some());
        assert!(book.is_ignored("005"));

        let out = book
            .handler_for("245__a")
            .unwrap()
            .call(&json!("T"), &Map::new())
            .unwrap();
        assert!(out.contains_key("book_title"));

        assert_eq!(book.defaults()["resource_type"], "publication-book");
        assert_eq!(book.defaults()["access"]["record"], "public");
        // base untouched
        assert_eq!(base.defaults()["resource_type"], "publication");
    }

    #[test]
    fn own_ignore_overrides_base_handler() {
        let model = TransformModel::builder("restricted")
            .extends(&base())
            .ignore(&["8564_*"])
            .build();
        assert!(model.handler_for("8564_u").is_none());
        assert!(model.is_ignored("8564_u"));
    }

    #[test]
    fn own_handler_overrides_base_ignore() {
        let model = TransformModel::builder("audited")
            .extends(&base())
            .handle("005", set("modified"))
            .build();
        assert!(!model.is_ignored("005"));
        assert!(model.handler_for("005").is_some());
    }
}
