//! Document filters for `find`.
//!
//! Query planning belongs to the layers above; this is just enough to
//! select documents by id or by field equality.

use serde_json::Value;
use shadowtx_storage::{Document, DocumentId};
use std::collections::BTreeSet;

/// Selects documents within one collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Every document.
    All,
    /// Documents with one of the given ids.
    Ids(Vec<DocumentId>),
    /// Documents whose body has `value` at the dotted `path`.
    Eq {
        /// Dotted field path, e.g. `"address.city"`.
        path: String,
        /// Value to compare with.
        value: Value,
    },
    /// Documents matching every sub-filter.
    And(Vec<Filter>),
}

impl Filter {
    /// Matches a single id.
    pub fn id(id: impl Into<DocumentId>) -> Self {
        Self::Ids(vec![id.into()])
    }

    /// Matches any of the given ids.
    pub fn ids<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<DocumentId>,
    {
        Self::Ids(ids.into_iter().map(Into::into).collect())
    }

    /// Matches documents with `value` at `path`.
    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            path: path.into(),
            value: value.into(),
        }
    }

    /// Combines two filters.
    #[must_use]
    pub fn and(self, other: Filter) -> Self {
        match self {
            Self::And(mut filters) => {
                filters.push(other);
                Self::And(filters)
            }
            first => Self::And(vec![first, other]),
        }
    }

    /// Returns true if `doc` is selected.
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Self::All => true,
            Self::Ids(ids) => ids.contains(&doc.id),
            Self::Eq { path, value } => lookup(&doc.body, path) == Some(value),
            Self::And(filters) => filters.iter().all(|f| f.matches(doc)),
        }
    }

    /// The ids this filter is restricted to, if it is restricted at all.
    ///
    /// Lets callers use point lookups instead of a scan.
    #[must_use]
    pub fn id_bound(&self) -> Option<BTreeSet<DocumentId>> {
        match self {
            Self::Ids(ids) => Some(ids.iter().cloned().collect()),
            Self::And(filters) => filters
                .iter()
                .filter_map(Filter::id_bound)
                .reduce(|a, b| a.intersection(&b).cloned().collect()),
            Self::All | Self::Eq { .. } => None,
        }
    }
}

fn lookup<'a>(body: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(body, |value, segment| match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
