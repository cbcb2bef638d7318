//! Collection of plugin records with taxonomy indexes.
//!
//! Aggregation runs behind a barrier: every source task hands its records
//! over, then [`Collection::build`] indexes them in one pass.
//!
//! ```text
//! source A records ─┐
//! source B records ─┼─► Collection { records, indexes[dimension][term] }
//! source C records ─┘
//! ```
//!
//! Indexes are keyed by the plural front-matter name of each dimension so
//! that the exporter, the label configuration and the site templates all
//! agree on one spelling.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::warn;

use crate::models::{MissingDetail, PluginIdentity, PluginRecord};

/// A facet along which records are grouped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaxonomyDimension {
    Category,
    Keyword,
    Author,
    License,
    ImplementationLanguage,
    Repository,
    MissingDetail,
    Capability,
    Family,
}

impl TaxonomyDimension {
    pub const ALL: [TaxonomyDimension; 9] = [
        TaxonomyDimension::Category,
        TaxonomyDimension::Keyword,
        TaxonomyDimension::Author,
        TaxonomyDimension::License,
        TaxonomyDimension::ImplementationLanguage,
        TaxonomyDimension::Repository,
        TaxonomyDimension::MissingDetail,
        TaxonomyDimension::Capability,
        TaxonomyDimension::Family,
    ];

    /// Front-matter key, also used for listing files and label tables.
    pub fn key(&self) -> &'static str {
        match self {
            TaxonomyDimension::Category => "categories",
            TaxonomyDimension::Keyword => "keywords",
            TaxonomyDimension::Author => "authors",
            TaxonomyDimension::License => "licenses",
            TaxonomyDimension::ImplementationLanguage => "implementation_languages",
            TaxonomyDimension::Repository => "repositories",
            TaxonomyDimension::MissingDetail => "missing_details",
            TaxonomyDimension::Capability => "capabilities",
            TaxonomyDimension::Family => "families",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.key() == key)
    }

    /// Terms the record declares along this dimension.
    pub fn values(&self, record: &PluginRecord) -> BTreeSet<String> {
        match self {
            TaxonomyDimension::Category => record.categories.clone(),
            TaxonomyDimension::Keyword => record.keywords.clone(),
            TaxonomyDimension::Author => record.authors.iter().cloned().collect(),
            TaxonomyDimension::License => record.license.iter().cloned().collect(),
            TaxonomyDimension::ImplementationLanguage => {
                record.implementation_language.iter().cloned().collect()
            }
            TaxonomyDimension::Repository => {
                BTreeSet::from([record.source_repository.clone()])
            }
            TaxonomyDimension::MissingDetail => record
                .missing_details
                .iter()
                .map(|d| d.as_str().to_string())
                .collect(),
            TaxonomyDimension::Capability => record.capabilities.clone(),
            TaxonomyDimension::Family => record.family.iter().cloned().collect(),
        }
    }
}

impl fmt::Display for TaxonomyDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// term → plugins declaring it.
pub type TermIndex = BTreeMap<String, BTreeSet<PluginIdentity>>;

/// All records of a run, indexed by identity and by taxonomy term.
#[derive(Debug, Default)]
pub struct Collection {
    records: BTreeMap<PluginIdentity, PluginRecord>,
    indexes: BTreeMap<TaxonomyDimension, TermIndex>,
}

impl Collection {
    /// Index the records of every source. A repeated identity keeps the
    /// first record.
    pub fn build(records: impl IntoIterator<Item = PluginRecord>) -> Self {
        let mut collection = Collection {
            records: BTreeMap::new(),
            indexes: TaxonomyDimension::ALL
                .into_iter()
                .map(|d| (d, TermIndex::new()))
                .collect(),
        };

        for record in records {
            if collection.records.contains_key(&record.identity) {
                warn!(
                    identity = %record.identity,
                    "Duplicate plugin identity, keeping the first record"
                );
                continue;
            }
            for (dimension, index) in collection.indexes.iter_mut() {
                for term in dimension.values(&record) {
                    index
                        .entry(term)
                        .or_default()
                        .insert(record.identity.clone());
                }
            }
            collection.records.insert(record.identity.clone(), record);
        }

        collection
    }

    pub fn records(&self) -> impl Iterator<Item = &PluginRecord> {
        self.records.values()
    }

    pub fn get(&self, identity: &PluginIdentity) -> Option<&PluginRecord> {
        self.records.get(identity)
    }

    pub fn index(&self, dimension: TaxonomyDimension) -> &TermIndex {
        static EMPTY: TermIndex = TermIndex::new();
        self.indexes.get(&dimension).unwrap_or(&EMPTY)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Check that indexes and records agree in both directions.
    pub fn verify(&self) -> Result<()> {
        for dimension in TaxonomyDimension::ALL {
            let index = self.index(dimension);
            for (term, members) in index {
                for identity in members {
                    let Some(record) = self.records.get(identity) else {
                        bail!("{} '{}' lists unknown plugin {}", dimension, term, identity);
                    };
                    if !dimension.values(record).contains(term) {
                        bail!("{} '{}' lists {} which does not declare it", dimension, term, identity);
                    }
                }
            }
            for record in self.records.values() {
                for term in dimension.values(record) {
                    let listed = index
                        .get(&term)
                        .is_some_and(|members| members.contains(&record.identity));
                    if !listed {
                        bail!("{} declares {} '{}' but is not indexed", record.identity, dimension, term);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn statistics(&self) -> Statistics {
        let mut stats = Statistics::default();
        for record in self.records.values() {
            stats.add(record);
        }
        stats
    }
}

/// Counts written to `statistics.json` and shown by `gallery stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub all: usize,
    pub documented: usize,
    /// Records lacking each detail; every detail is listed, even at zero.
    pub missing: BTreeMap<String, usize>,
    /// Records declaring at least one category outside the well-known list.
    pub unexpected_categories: usize,
    pub repositories: BTreeMap<String, usize>,
}

impl Default for Statistics {
    fn default() -> Self {
        Self {
            all: 0,
            documented: 0,
            missing: MissingDetail::ALL
                .iter()
                .map(|d| (d.as_str().to_string(), 0))
                .collect(),
            unexpected_categories: 0,
            repositories: BTreeMap::new(),
        }
    }
}

impl Statistics {
    pub fn add(&mut self, record: &PluginRecord) {
        self.all += 1;
        if record.is_documented() {
            self.documented += 1;
        }
        for detail in &record.missing_details {
            *self.missing.entry(detail.as_str().to_string()).or_default() += 1;
        }
        if !record.unexpected_categories.is_empty() {
            self.unexpected_categories += 1;
        }
        *self
            .repositories
            .entry(record.source_repository.clone())
            .or_default() += 1;
    }
}

/// Directory name for a taxonomy term, close to what Hugo's `urlize` does.
pub fn slugify(term: &str) -> String {
    let mut slug = String::with_capacity(term.len());
    let mut dash = false;
    for c in term.trim().chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() || c == '_' || c == '.' {
            if dash && !slug.is_empty() {
                slug.push('-');
            }
            dash = false;
            slug.push(c);
        } else {
            dash = true;
        }
    }
    if slug.chars().all(|c| c == '.') {
        slug = "_".to_string();
    }
    slug
}
