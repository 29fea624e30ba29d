use crate::error::ServiceError;
use crate::lock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Externally stored source metadata backing a citation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BibliographyEntry {
    pub id: String,
    #[serde(default)]
    pub document_id: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
}

impl BibliographyEntry {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            document_id: String::new(),
            authors: Vec::new(),
            year: None,
            title: title.into(),
            url: None,
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.authors.push(author.into());
        self
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn in_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = document_id.into();
        self
    }
}

/// A citation as persisted in the store: the span id plus its entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationRecord {
    pub citation_id: String,
    pub entry: BibliographyEntry,
}

/// Bibliography/citation store. The citation subsystem is its sole writer.
pub trait BibliographyStore: Send + Sync {
    fn create(&self, record: CitationRecord)
    -> impl Future<Output = Result<(), ServiceError>> + Send;

    fn delete(&self, citation_id: &str) -> impl Future<Output = Result<(), ServiceError>> + Send;

    fn list_by_document(
        &self,
        document_id: &str,
    ) -> impl Future<Output = Result<Vec<CitationRecord>, ServiceError>> + Send;
}

impl<T: BibliographyStore> BibliographyStore for Arc<T> {
    fn create(
        &self,
        record: CitationRecord,
    ) -> impl Future<Output = Result<(), ServiceError>> + Send {
        (**self).create(record)
    }
    fn delete(&self, citation_id: &str) -> impl Future<Output = Result<(), ServiceError>> + Send {
        (**self).delete(citation_id)
    }
    fn list_by_document(
        &self,
        document_id: &str,
    ) -> impl Future<Output = Result<Vec<CitationRecord>, ServiceError>> + Send {
        (**self).list_by_document(document_id)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryBibliography {
    records: Mutex<BTreeMap<String, CitationRecord>>,
    fail_next: Mutex<Option<ServiceError>>,
    deleted: Mutex<Vec<String>>,
}

impl InMemoryBibliography {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate (e.g. from a file loaded by the CLI).
    pub fn with_records(records: impl IntoIterator<Item = CitationRecord>) -> Self {
        let store = Self::default();
        {
            let mut map = lock(&store.records);
            for r in records {
                map.insert(r.citation_id.clone(), r);
            }
        }
        store
    }

    /// The next call fails with `err`.
    pub fn fail_next(&self, err: ServiceError) {
        *lock(&self.fail_next) = Some(err);
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.records).is_empty()
    }

    pub fn get(&self, citation_id: &str) -> Option<CitationRecord> {
        lock(&self.records).get(citation_id).cloned()
    }

    /// Ids deleted so far, in call order.
    pub fn deleted(&self) -> Vec<String> {
        lock(&self.deleted).clone()
    }

    fn injected_failure(&self) -> Option<ServiceError> {
        lock(&self.fail_next).take()
    }
}

impl BibliographyStore for InMemoryBibliography {
    async fn create(&self, record: CitationRecord) -> Result<(), ServiceError> {
        if let Some(err) = self.injected_failure() {
            return Err(err);
        }
        debug!(target: "services.bibliography", citation_id = %record.citation_id, "create");
        lock(&self.records).insert(record.citation_id.clone(), record);
        Ok(())
    }

    async fn delete(&self, citation_id: &str) -> Result<(), ServiceError> {
        if let Some(err) = self.injected_failure() {
            return Err(err);
        }
        if lock(&self.records).remove(citation_id).is_none() {
            return Err(ServiceError::NotFound(citation_id.to_string()));
        }
        debug!(target: "services.bibliography", citation_id, "delete");
        lock(&self.deleted).push(citation_id.to_string());
        Ok(())
    }

    async fn list_by_document(&self, document_id: &str) -> Result<Vec<CitationRecord>, ServiceError> {
        if let Some(err) = self.injected_failure() {
            return Err(err);
        }
        Ok(lock(&self.records)
            .values()
            .filter(|r| r.entry.document_id == document_id)
            .cloned()
            .collect())
    }
}
