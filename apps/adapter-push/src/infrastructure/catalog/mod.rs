//! Tag Catalog
//!
//! In-memory tag catalogue backing tag name resolution. Callers may refer
//! to a tag by its ID or by its display name, in any letter case; both
//! resolve to the tag ID.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::application::error::ResolutionError;
use crate::application::ports::KeyResolver;
use crate::domain::subscription::CallerContext;

/// A tag known to the catalogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagDefinition {
    /// Canonical tag ID.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Engineering units.
    pub units: Option<String>,
}

impl TagDefinition {
    /// Create a definition with no units.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            units: None,
        }
    }

    /// Set engineering units.
    #[must_use]
    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }
}

#[derive(Debug, Default)]
struct CatalogIndex {
    tags: HashMap<String, TagDefinition>,
    lookup: HashMap<String, String>,
}

/// [`KeyResolver`] over an in-memory tag catalogue.
#[derive(Debug, Default)]
pub struct TagCatalogResolver {
    index: RwLock<CatalogIndex>,
}

impl TagCatalogResolver {
    /// Create an empty catalogue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalogue holding `tags`.
    #[must_use]
    pub fn with_tags(tags: impl IntoIterator<Item = TagDefinition>) -> Self {
        let catalog = Self::new();
        for tag in tags {
            catalog.register(tag);
        }
        catalog
    }

    /// Add or replace a tag.
    pub fn register(&self, tag: TagDefinition) {
        let mut index = self.index.write();
        if let Some(previous) = index.tags.remove(&tag.id) {
            index.lookup.remove(&previous.name.to_lowercase());
            index.lookup.remove(&previous.id.to_lowercase());
        }
        index.lookup.insert(tag.name.to_lowercase(), tag.id.clone());
        index.lookup.insert(tag.id.to_lowercase(), tag.id.clone());
        index.tags.insert(tag.id.clone(), tag);
    }

    /// Tag by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<TagDefinition> {
        self.index.read().tags.get(id).cloned()
    }

    /// All tags, sorted by ID.
    #[must_use]
    pub fn tags(&self) -> Vec<TagDefinition> {
        let mut tags: Vec<TagDefinition> = self.index.read().tags.values().cloned().collect();
        tags.sort_by(|a, b| a.id.cmp(&b.id));
        tags
    }

    /// Resolve one ID or name.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::EmptyName`] for a blank name and
    /// [`ResolutionError::NotFound`] for an unknown one.
    pub fn resolve_name(&self, name: &str) -> Result<String, ResolutionError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ResolutionError::EmptyName);
        }
        self.index
            .read()
            .lookup
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| ResolutionError::NotFound(name.to_string()))
    }
}

#[async_trait]
impl KeyResolver for TagCatalogResolver {
    async fn resolve(
        &self,
        context: &CallerContext,
        names: &[String],
    ) -> Vec<Result<String, ResolutionError>> {
        names
            .iter()
            .map(|name| {
                let resolved = self.resolve_name(name);
                if let Err(error) = &resolved {
                    tracing::debug!(
                        session_id = %context.session_id(),
                        name = %name,
                        error = %error,
                        "Tag name not resolved"
                    );
                }
                resolved
            })
            .collect()
    }
}
