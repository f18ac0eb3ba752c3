//! Shadow staging area.
//!
//! Every base collection `C` has a shadow collection `C<suffix>` holding
//! the post-transaction version of each document a transaction inserted
//! or updated. At most one transaction can stage a given id, because
//! staging only happens under that id's lock.

use crate::config::Config;
use crate::error::CoreResult;
use crate::filter::Filter;
use shadowtx_storage::{Document, DocumentId, DocumentStore};
use std::sync::Arc;

/// Staged document versions, one shadow collection per base collection.
pub struct ShadowArea {
    store: Arc<dyn DocumentStore>,
    suffix: String,
}

impl ShadowArea {
    /// Creates a shadow area naming shadows as configured.
    pub fn new(store: Arc<dyn DocumentStore>, config: &Config) -> Self {
        Self {
            store,
            suffix: config.staging_suffix.clone(),
        }
    }

    fn shadow(&self, collection: &str) -> String {
        format!("{collection}{}", self.suffix)
    }

    /// Writes or overwrites the staged version of `doc`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn stage(&self, collection: &str, doc: &Document) -> CoreResult<()> {
        self.store.put(&self.shadow(collection), doc)?;
        Ok(())
    }

    /// Removes the staged version of a document. Absence is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn unstage(&self, collection: &str, id: &DocumentId) -> CoreResult<()> {
        self.store.remove(&self.shadow(collection), id)?;
        Ok(())
    }

    /// Removes the staged version of `doc.id` only if it is exactly `doc`.
    ///
    /// Returns `true` if it was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn unstage_if(&self, collection: &str, doc: &Document) -> CoreResult<bool> {
        Ok(self.store.remove_if(&self.shadow(collection), doc)?)
    }

    /// Base collections that currently have staged documents.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn staged_collections(&self) -> CoreResult<Vec<String>> {
        Ok(self
            .store
            .collections()?
            .into_iter()
            .filter_map(|name| name.strip_suffix(self.suffix.as_str()).map(str::to_string))
            .filter(|base| !base.is_empty())
            .collect())
    }

    /// Returns the staged version of a document, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn read_staged(&self, collection: &str, id: &DocumentId) -> CoreResult<Option<Document>> {
        Ok(self.store.get(&self.shadow(collection), id)?)
    }

    /// Returns the staged documents of `collection` matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn query_staged(&self, collection: &str, filter: &Filter) -> CoreResult<Vec<Document>> {
        let shadow = self.shadow(collection);
        let docs = match filter.id_bound() {
            Some(ids) => {
                let mut docs = Vec::with_capacity(ids.len());
                for id in &ids {
                    if let Some(doc) = self.store.get(&shadow, id)? {
                        docs.push(doc);
                    }
                }
                docs
            }
            None => self.store.scan(&shadow)?,
        };
        Ok(docs.into_iter().filter(|doc| filter.matches(doc)).collect())
    }

    /// Removes the staged versions of `ids`. Returns how many existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn clear(&self, collection: &str, ids: &[DocumentId]) -> CoreResult<usize> {
        let shadow = self.shadow(collection);
        let mut removed = 0;
        for id in ids {
            if self.store.remove(&shadow, id)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for ShadowArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowArea")
            .field("suffix", &self.suffix)
            .finish_non_exhaustive()
    }
}
