use async_trait::async_trait;

use crate::relay::error::DirectoryError;
use crate::relay::types::Recipient;

/// Read-only view over subscriber accounts.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// Recipients whose subscription is active right now. Opt-in flags are
    /// returned as stored; the dispatcher applies them.
    async fn list_eligible_recipients(&self) -> Result<Vec<Recipient>, DirectoryError>;
}
