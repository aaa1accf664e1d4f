//! Statically registered model table and model selection.

use std::collections::BTreeSet;

use ferry_types::entry::LegacyEntry;
use ferry_types::error::MigrationError;

use crate::rules::model::TransformModel;
use crate::rules::predicate::PredicateError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("model '{0}' has no selection predicate and cannot be registered")]
    Abstract(String),
    #[error("model '{0}' is already registered")]
    Duplicate(String),
    #[error("unknown model '{0}'")]
    UnknownModel(String),
    #[error("invalid predicate: {0}")]
    Predicate(#[from] PredicateError),
}

/// Outcome of matching an entry's tags against the registry.
#[derive(Debug, Clone, Copy)]
pub enum Selection<'a> {
    Matched(&'a TransformModel),
    Unmatched,
    /// Several models matched; `chosen` is the earliest registered one.
    Ambiguous {
        chosen: &'a TransformModel,
        candidates: usize,
    },
}

/// Ordered model table. Registration order is selection priority.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: Vec<TransformModel>,
}

impl ModelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a concrete model.
    ///
    /// # Errors
    ///
    /// Rejects abstract models and duplicate names.
    pub fn register(&mut self, model: TransformModel) -> Result<(), RegistryError> {
        if model.is_abstract() {
            return Err(RegistryError::Abstract(model.name().to_string()));
        }
        if self.get(model.name()).is_some() {
            return Err(RegistryError::Duplicate(model.name().to_string()));
        }
        self.models.push(model);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TransformModel> {
        self.models.iter().find(|m| m.name() == name)
    }

    #[must_use]
    pub fn models(&self) -> &[TransformModel] {
        &self.models
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Sub-registry holding only `names`, in original registration order.
    /// An empty list keeps every model.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownModel`] for a name that is not
    /// registered.
    pub fn restrict(&self, names: &[String]) -> Result<Self, RegistryError> {
        if names.is_empty() {
            return Ok(self.clone());
        }
        if let Some(unknown) = names.iter().find(|n| self.get(n).is_none()) {
            return Err(RegistryError::UnknownModel(unknown.clone()));
        }
        Ok(Self {
            models: self
                .models
                .iter()
                .filter(|m| names.iter().any(|n| n == m.name()))
                .cloned()
                .collect(),
        })
    }

    /// Match `tags` against every registered predicate.
    #[must_use]
    pub fn select(&self, tags: &BTreeSet<String>) -> Selection<'_> {
        let mut matching = self
            .models
            .iter()
            .filter(|m| m.predicate().is_some_and(|p| p.matches(tags)));

        let Some(first) = matching.next() else {
            return Selection::Unmatched;
        };
        let others = matching.count();
        if others == 0 {
            Selection::Matched(first)
        } else {
            Selection::Ambiguous {
                chosen: first,
                candidates: others + 1,
            }
        }
    }

    /// Pick the model for an entry.
    ///
    /// Ambiguous matches resolve to the earliest registered model and are
    /// logged.
    ///
    /// # Errors
    ///
    /// Returns an entry-scoped unroutable error when nothing matches.
    pub fn route(&self, entry: &LegacyEntry) -> Result<&TransformModel, MigrationError> {
        match self.select(&entry.tags) {
            Selection::Matched(model) => Ok(model),
            Selection::Ambiguous { chosen, candidates } => {
                tracing::warn!(
                    legacy_id = entry.id.as_str(),
                    model = chosen.name(),
                    candidates,
                    tags = ?entry.tags,
                    "Ambiguous model selection, using first registered"
                );
                Ok(chosen)
            }
            Selection::Unmatched => Err(MigrationError::unroutable(
                entry.id.as_str(),
                format!("no transform model matches tags {:?}", entry.tags),
            )
            .with_details(serde_json::json!({ "tags": entry.tags }))),
        }
    }
}
