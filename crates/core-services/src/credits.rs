use crate::error::ServiceError;
use crate::lock;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Word-credit collaborator. Injected per editor; there is no process-wide
/// balance.
pub trait WordCredits: Send + Sync {
    fn initialize(&self, user_id: &str) -> impl Future<Output = Result<(), ServiceError>> + Send;

    fn check_availability(&self, words: u64)
    -> impl Future<Output = Result<bool, ServiceError>> + Send;

    fn debit(&self, words: u64) -> impl Future<Output = Result<(), ServiceError>> + Send;
}

impl<T: WordCredits> WordCredits for Arc<T> {
    fn initialize(&self, user_id: &str) -> impl Future<Output = Result<(), ServiceError>> + Send {
        (**self).initialize(user_id)
    }
    fn check_availability(
        &self,
        words: u64,
    ) -> impl Future<Output = Result<bool, ServiceError>> + Send {
        (**self).check_availability(words)
    }
    fn debit(&self, words: u64) -> impl Future<Output = Result<(), ServiceError>> + Send {
        (**self).debit(words)
    }
}

#[derive(Debug, Default)]
struct Account {
    user_id: Option<String>,
    balance: u64,
    debited: u64,
}

/// Fixed balance, decremented by debits.
#[derive(Debug, Default)]
pub struct InMemoryCredits {
    account: Mutex<Account>,
}

impl InMemoryCredits {
    pub fn new(balance: u64) -> Self {
        Self {
            account: Mutex::new(Account {
                balance,
                ..Account::default()
            }),
        }
    }

    pub fn balance(&self) -> u64 {
        lock(&self.account).balance
    }

    /// Total words debited since creation.
    pub fn debited(&self) -> u64 {
        lock(&self.account).debited
    }

    pub fn user_id(&self) -> Option<String> {
        lock(&self.account).user_id.clone()
    }
}

impl WordCredits for InMemoryCredits {
    async fn initialize(&self, user_id: &str) -> Result<(), ServiceError> {
        debug!(target: "services.credits", user_id, "initialize");
        lock(&self.account).user_id = Some(user_id.to_string());
        Ok(())
    }

    async fn check_availability(&self, words: u64) -> Result<bool, ServiceError> {
        Ok(lock(&self.account).balance >= words)
    }

    async fn debit(&self, words: u64) -> Result<(), ServiceError> {
        let mut account = lock(&self.account);
        if account.balance < words {
            return Err(ServiceError::InsufficientCredits {
                requested: words,
                available: account.balance,
            });
        }
        account.balance -= words;
        account.debited += words;
        debug!(target: "services.credits", words, balance = account.balance, "debit");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn debit_respects_balance() {
        let credits = InMemoryCredits::new(10);
        credits.initialize("u1").await.unwrap();
        assert_eq!(credits.user_id().as_deref(), Some("u1"));
        assert!(credits.check_availability(10).await.unwrap());
        assert!(!credits.check_availability(50).await.unwrap());
        assert!(matches!(
            credits.debit(50).await,
            Err(ServiceError::InsufficientCredits { requested: 50, available: 10 })
        ));
        credits.debit(4).await.unwrap();
        assert_eq!(credits.balance(), 6);
        assert_eq!(credits.debited(), 4);
    }
}
