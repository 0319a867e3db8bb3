use crate::error::MarkerError;
use crate::store::lock::UnitLock;
use crate::types::{UnitEvent, UnitKey};
use async_trait::async_trait;

/// Append-only event storage, one stream per (task, student, module) unit.
///
/// `append` must not return until the event is durable; the pipeline relies on
/// that to resume after a crash without repeating model calls.
#[async_trait]
pub trait ResponseLog: Send + Sync {
    async fn append(&self, key: &UnitKey, event: &UnitEvent) -> Result<(), MarkerError>;

    /// All events for the unit in the order they were appended.
    async fn events(&self, key: &UnitKey) -> Result<Vec<UnitEvent>, MarkerError>;

    /// Claims the unit for writing. Fails with [`MarkerError::UnitLocked`]
    /// while another writer holds it; released when the guard drops.
    fn lock(&self, key: &UnitKey) -> Result<UnitLock, MarkerError>;
}
