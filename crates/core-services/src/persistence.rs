use crate::error::ServiceError;
use crate::lock;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::debug;

pub trait PersistenceService: Send + Sync {
    fn save(
        &self,
        document_id: &str,
        content: &str,
    ) -> impl Future<Output = Result<(), ServiceError>> + Send;
}

impl<T: PersistenceService> PersistenceService for Arc<T> {
    fn save(
        &self,
        document_id: &str,
        content: &str,
    ) -> impl Future<Output = Result<(), ServiceError>> + Send {
        (**self).save(document_id, content)
    }
}

/// Keeps every successful write in memory.
#[derive(Debug, Default)]
pub struct RecordingPersistence {
    saves: Mutex<Vec<(String, String)>>,
    fail_next: Mutex<Option<ServiceError>>,
}

impl RecordingPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, err: ServiceError) {
        *lock(&self.fail_next) = Some(err);
    }

    /// `(document_id, content)` pairs in write order.
    pub fn saves(&self) -> Vec<(String, String)> {
        lock(&self.saves).clone()
    }

    pub fn last(&self) -> Option<(String, String)> {
        lock(&self.saves).last().cloned()
    }
}

impl PersistenceService for RecordingPersistence {
    async fn save(&self, document_id: &str, content: &str) -> Result<(), ServiceError> {
        if let Some(err) = lock(&self.fail_next).take() {
            return Err(err);
        }
        debug!(target: "services.persistence", document_id, bytes = content.len(), "save");
        lock(&self.saves).push((document_id.to_string(), content.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_writes_and_injected_failure() {
        let p = RecordingPersistence::new();
        p.fail_next(ServiceError::Network("down".into()));
        assert!(p.save("d1", "<p>a</p>").await.is_err());
        p.save("d1", "<p>b</p>").await.unwrap();
        assert_eq!(p.saves().len(), 1);
        assert_eq!(p.last(), Some(("d1".to_string(), "<p>b</p>".to_string())));
    }
}
