use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AllocationError;
use crate::port::model::{Port, PortDescriptor, PortState};

/// Catalogue of allocatable ports and their operator-facing lifecycle.
///
/// Assignment fields are owned by the allocation engine: nothing on this
/// trait can move a port into or out of ASSIGNED.
#[async_trait]
pub trait PortRepository: Send + Sync {
    /// Creates a port (state AVAILABLE) and its CREATE audit entry in one
    /// transaction. Rejects an already-registered url.
    async fn create(
        &self,
        descriptor: &PortDescriptor,
        operator_id: &Uuid,
        now_ms: u64,
    ) -> Result<Port, AllocationError>;

    async fn fetch_by_id(&self, port_id: &Uuid) -> Result<Option<Port>, AllocationError>;

    async fn fetch_by_url(&self, url: &str) -> Result<Option<Port>, AllocationError>;

    /// AVAILABLE ports in stable creation order, so contending allocators
    /// converge on the same candidates instead of spraying retries.
    async fn find_available(&self, limit: usize) -> Result<Vec<Port>, AllocationError>;

    async fn count_available(&self) -> Result<u64, AllocationError>;

    /// Operator edit of url/note. Unique-url enforcement applies here too.
    async fn update(
        &self,
        port_id: &Uuid,
        url: &str,
        note: Option<&str>,
    ) -> Result<Port, AllocationError>;

    /// Manual move between AVAILABLE / RESERVED / DISABLED.
    /// Rejected while the port is assigned; ASSIGNED itself is not a valid
    /// target (that transition belongs to the engine).
    async fn set_state(
        &self,
        port_id: &Uuid,
        new_state: PortState,
        operator_id: &Uuid,
    ) -> Result<Port, AllocationError>;

    /// Rejected while the port is assigned.
    async fn delete(&self, port_id: &Uuid) -> Result<(), AllocationError>;
}
