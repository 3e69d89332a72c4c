use std::sync::Arc;

use serde::Serialize;

use crate::error::AllocationError;
use crate::port::model::Port;
use crate::port::repository::PortRepository;

/// Checkout verdict. Advisory: capacity can vanish between this check and
/// the post-payment allocation, which then parks the subscription as
/// PENDING_ALLOCATION rather than failing.
#[derive(Clone, Debug, Serialize)]
pub struct CheckoutGate {
    pub can_proceed: bool,
    pub message: String,
}

/// Read-only view of pool capacity for the checkout flow and admin panel.
/// Never mutates anything.
pub struct AvailabilityQuery {
    ports: Arc<dyn PortRepository>,
}

impl AvailabilityQuery {
    pub fn new(ports: Arc<dyn PortRepository>) -> Self {
        Self { ports }
    }

    pub async fn has_available(&self) -> Result<bool, AllocationError> {
        Ok(self.ports.count_available().await? > 0)
    }

    pub async fn available_count(&self) -> Result<u64, AllocationError> {
        self.ports.count_available().await
    }

    pub async fn list_available(&self, limit: usize) -> Result<Vec<Port>, AllocationError> {
        self.ports.find_available(limit).await
    }

    /// Gate consulted before an order is created.
    pub async fn validate_checkout(&self) -> Result<CheckoutGate, AllocationError> {
        let count = self.ports.count_available().await?;

        Ok(if count > 0 {
            CheckoutGate {
                can_proceed: true,
                message: format!("{count} port(s) available for immediate activation"),
            }
        } else {
            CheckoutGate {
                can_proceed: false,
                message: "no ports are currently available; please try again later".to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use uuid::Uuid;

    use crate::port::model::{PortDescriptor, PortState};

    struct FixedPorts {
        available: Mutex<Vec<Port>>,
    }

    impl FixedPorts {
        fn with_count(n: usize) -> Arc<Self> {
            let ports = (0..n)
                .map(|i| Port {
                    port_id: Uuid::new_v4(),
                    url: format!("https://node-{i}.example.net"),
                    note: None,
                    state: PortState::Available,
                    assignment: None,
                    created_at_ms: i as u64,
                })
                .collect();
            Arc::new(Self {
                available: Mutex::new(ports),
            })
        }
    }

    #[async_trait]
    impl PortRepository for FixedPorts {
        async fn create(
            &self,
            _descriptor: &PortDescriptor,
            _operator_id: &Uuid,
            _now_ms: u64,
        ) -> Result<Port, AllocationError> {
            unimplemented!("read-only fixture")
        }

        async fn fetch_by_id(&self, _port_id: &Uuid) -> Result<Option<Port>, AllocationError> {
            unimplemented!("read-only fixture")
        }

        async fn fetch_by_url(&self, _url: &str) -> Result<Option<Port>, AllocationError> {
            unimplemented!("read-only fixture")
        }

        async fn find_available(&self, limit: usize) -> Result<Vec<Port>, AllocationError> {
            Ok(self.available.lock().iter().take(limit).cloned().collect())
        }

        async fn count_available(&self) -> Result<u64, AllocationError> {
            Ok(self.available.lock().len() as u64)
        }

        async fn update(
            &self,
            _port_id: &Uuid,
            _url: &str,
            _note: Option<&str>,
        ) -> Result<Port, AllocationError> {
            unimplemented!("read-only fixture")
        }

        async fn set_state(
            &self,
            _port_id: &Uuid,
            _new_state: PortState,
            _operator_id: &Uuid,
        ) -> Result<Port, AllocationError> {
            unimplemented!("read-only fixture")
        }

        async fn delete(&self, _port_id: &Uuid) -> Result<(), AllocationError> {
            unimplemented!("read-only fixture")
        }
    }

    #[tokio::test]
    async fn checkout_blocked_when_pool_empty() {
        let q = AvailabilityQuery::new(FixedPorts::with_count(0));

        assert!(!q.has_available().await.unwrap());
        assert_eq!(q.available_count().await.unwrap(), 0);

        let gate = q.validate_checkout().await.unwrap();
        assert!(!gate.can_proceed);
    }

    #[tokio::test]
    async fn checkout_allowed_with_capacity() {
        let q = AvailabilityQuery::new(FixedPorts::with_count(3));

        assert!(q.has_available().await.unwrap());
        assert_eq!(q.available_count().await.unwrap(), 3);

        let gate = q.validate_checkout().await.unwrap();
        assert!(gate.can_proceed);
        assert!(gate.message.contains('3'));
    }

    #[tokio::test]
    async fn list_available_honors_limit() {
        let q = AvailabilityQuery::new(FixedPorts::with_count(5));

        assert_eq!(q.list_available(2).await.unwrap().len(), 2);
        assert_eq!(q.list_available(10).await.unwrap().len(), 5);
    }
}
