//! Orchestration layer for port allocation.
//!
//! Responsibilities:
//! - Pick an AVAILABLE candidate and drive the compare-and-set composite.
//! - Absorb lost races by moving to the next candidate.
//! - Park subscriptions as PENDING_ALLOCATION when the pool is dry and alert
//!   operators (best-effort).
//! - Operator entry points for reassignment and release.
//! - Reclaim ports still linked to expired/cancelled subscriptions.
//!
//! Non-responsibilities:
//! - Provisioning the underlying instance (external).
//! - Payments and pricing (external; allocation runs after payment success).
//! - Transaction mechanics (the repository composites own those).

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::allocation::repository::AllocationRepository;
use crate::allocation::types::{AllocationOutcome, AssignWrite, ReleaseReport};
use crate::error::AllocationError;
use crate::logger::warn_if_slow;
use crate::metrics::counters::Counters;
use crate::notify::CapacityNotifier;
use crate::port::model::Port;
use crate::port::repository::PortRepository;
use crate::subscription::model::SubscriptionStatus;
use crate::subscription::repository::SubscriptionRepository;
use crate::time::now_ms;

/// Drives every assignment-lifecycle transition. Nothing else in the system
/// writes a port's assignment fields or a subscription's port link.
pub struct AllocationEngine {
    allocations: Arc<dyn AllocationRepository>,
    ports: Arc<dyn PortRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    notifier: Arc<dyn CapacityNotifier>,
    counters: Counters,

    /// Upper bound on candidates tried per allocation before falling back
    /// to PENDING_ALLOCATION.
    max_candidates: usize,
}

impl AllocationEngine {
    pub fn new(
        allocations: Arc<dyn AllocationRepository>,
        ports: Arc<dyn PortRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        notifier: Arc<dyn CapacityNotifier>,
        counters: Counters,
        max_candidates: usize,
    ) -> Self {
        Self {
            allocations,
            ports,
            subscriptions,
            notifier,
            counters,
            max_candidates: max_candidates.max(1),
        }
    }

    /// Entry point for the payment-confirmation collaborator.
    ///
    /// Idempotent: webhook retries for a subscription that already holds a
    /// port observe the original assignment, with no second mutation or log
    /// entry. An exhausted pool is a normal outcome (`Pending`), never an
    /// error.
    #[instrument(
        skip(self),
        target = "allocation",
        fields(subscription_id = %subscription_id)
    )]
    pub async fn allocate_for_subscription(
        &self,
        subscription_id: &Uuid,
    ) -> Result<AllocationOutcome, AllocationError> {
        let sub = self
            .subscriptions
            .fetch_by_id(subscription_id)
            .await?
            .ok_or(AllocationError::SubscriptionNotFound(*subscription_id))?;

        if let Some(port_id) = sub.port_id {
            debug!(%port_id, "subscription already holds a port; returning existing assignment");
            let port = self
                .ports
                .fetch_by_id(&port_id)
                .await?
                .ok_or(AllocationError::PortNotFound(port_id))?;
            return Ok(AllocationOutcome::Assigned(port));
        }

        let candidates = warn_if_slow(
            "db_find_available",
            Duration::from_millis(100),
            self.ports.find_available(self.max_candidates),
        )
        .await?;

        for candidate in &candidates {
            match self
                .allocations
                .assign(&candidate.port_id, subscription_id, &sub.customer_id, now_ms())
                .await
            {
                Ok(AssignWrite::Committed(port)) => {
                    self.counters.alloc_assigned.fetch_add(1, Ordering::Relaxed);
                    info!(port_id = %port.port_id, url = %port.url, "port assigned");
                    return Ok(AllocationOutcome::Assigned(port));
                }
                Ok(AssignWrite::LostRace) => {
                    self.counters.alloc_conflicts.fetch_add(1, Ordering::Relaxed);
                    debug!(port_id = %candidate.port_id, "candidate taken concurrently; trying next");
                }
                Err(AllocationError::AlreadyAssigned(_)) => {
                    // A concurrent call for this same subscription won the
                    // link while we raced for a port. Surface its result.
                    let sub = self
                        .subscriptions
                        .fetch_by_id(subscription_id)
                        .await?
                        .ok_or(AllocationError::SubscriptionNotFound(*subscription_id))?;
                    if let Some(port_id) = sub.port_id {
                        let port = self
                            .ports
                            .fetch_by_id(&port_id)
                            .await?
                            .ok_or(AllocationError::PortNotFound(port_id))?;
                        return Ok(AllocationOutcome::Assigned(port));
                    }
                    return Err(AllocationError::AlreadyAssigned(*subscription_id));
                }
                Err(e) => return Err(e),
            }
        }

        // Pool dry (or every candidate stolen underneath us): park the
        // subscription. Valid resting state, resolved by a later release or
        // new capacity.
        self.subscriptions
            .set_status(subscription_id, SubscriptionStatus::PendingAllocation)
            .await?;
        self.counters.alloc_pending.fetch_add(1, Ordering::Relaxed);
        info!("no port available; subscription parked as PENDING_ALLOCATION");

        if let Err(e) = self.notifier.notify_exhausted(*subscription_id).await {
            warn!(error = ?e, "capacity notification failed");
        }

        Ok(AllocationOutcome::Pending)
    }

    /// Operator action: move a port onto a different subscription.
    #[instrument(
        skip(self),
        target = "allocation",
        fields(port_id = %port_id, new_subscription_id = %new_subscription_id, operator_id = %operator_id)
    )]
    pub async fn reassign_port(
        &self,
        port_id: &Uuid,
        new_subscription_id: &Uuid,
        operator_id: &Uuid,
    ) -> Result<Port, AllocationError> {
        let port = self
            .allocations
            .reassign(port_id, new_subscription_id, operator_id, now_ms())
            .await?;

        self.counters.ports_reassigned.fetch_add(1, Ordering::Relaxed);
        info!("port reassigned");

        Ok(port)
    }

    /// Returns a port to the pool. `operator_id` is None for automatic
    /// releases (expiry, cancellation).
    #[instrument(
        skip(self),
        target = "allocation",
        fields(port_id = %port_id)
    )]
    pub async fn release_port(
        &self,
        port_id: &Uuid,
        operator_id: Option<&Uuid>,
    ) -> Result<ReleaseReport, AllocationError> {
        let report = self
            .allocations
            .release(port_id, operator_id, now_ms())
            .await?;

        if report.changed {
            self.counters.ports_released.fetch_add(1, Ordering::Relaxed);
            info!(cleared_subscription = ?report.cleared_subscription, "port released");
        } else {
            debug!("release was a no-op");
        }

        Ok(report)
    }

    /// One reconciliation pass: release ports still held by expired or
    /// cancelled subscriptions. Returns how many ports went back to the
    /// pool. Safe to re-run at any time.
    #[instrument(skip(self), target = "allocation")]
    pub async fn sweep_expired(&self, limit: usize) -> Result<usize, AllocationError> {
        let stale = warn_if_slow(
            "db_fetch_release_candidates",
            Duration::from_millis(200),
            self.subscriptions.fetch_release_candidates(limit),
        )
        .await?;

        let mut released = 0;
        for sub in stale {
            let Some(port_id) = sub.port_id else { continue };

            // Re-check the holder right before releasing: an operator may
            // have reassigned the port since the candidate scan.
            let Some(port) = self.ports.fetch_by_id(&port_id).await? else {
                warn!(%port_id, subscription_id = %sub.subscription_id, "dangling port link");
                continue;
            };
            if port.assignment.map(|a| a.subscription_id) != Some(sub.subscription_id) {
                debug!(%port_id, "holder changed since candidate scan; skipping");
                continue;
            }

            match self.allocations.release(&port_id, None, now_ms()).await {
                Ok(report) if report.changed => {
                    released += 1;
                    self.counters.sweep_released.fetch_add(1, Ordering::Relaxed);
                    info!(
                        %port_id,
                        subscription_id = %sub.subscription_id,
                        status = %sub.status,
                        "reclaimed port from terminated subscription"
                    );
                }
                Ok(_) => {}
                Err(AllocationError::PortNotFound(_)) => {
                    // Deleted between the check and the release.
                    warn!(%port_id, subscription_id = %sub.subscription_id, "dangling port link");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};
    use tracing_test::traced_test;

    use crate::port::model::{Assignment, PortDescriptor, PortState};
    use crate::subscription::model::{NewSubscription, Subscription};

    fn mk_port(id: Uuid) -> Port {
        Port {
            port_id: id,
            url: format!("https://node-{id}.example.net"),
            note: None,
            state: PortState::Available,
            assignment: None,
            created_at_ms: 0,
        }
    }

    fn mk_assigned_port(id: Uuid, sub: Uuid, cust: Uuid) -> Port {
        Port {
            port_id: id,
            url: format!("https://node-{id}.example.net"),
            note: None,
            state: PortState::Assigned,
            assignment: Some(Assignment {
                subscription_id: sub,
                customer_id: cust,
                assigned_at_ms: 1,
            }),
            created_at_ms: 0,
        }
    }

    fn mk_sub(id: Uuid, port_id: Option<Uuid>) -> Subscription {
        Subscription {
            subscription_id: id,
            customer_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            order_id: None,
            status: SubscriptionStatus::Active,
            port_id,
            created_at_ms: 0,
        }
    }

    #[derive(Default)]
    struct MockAllocations {
        assign_script: Mutex<VecDeque<Result<AssignWrite, AllocationError>>>,
        assign_calls: Mutex<Vec<Uuid>>,
        release_calls: Mutex<Vec<(Uuid, Option<Uuid>)>>,
        release_changed: Mutex<bool>,
    }

    #[async_trait]
    impl AllocationRepository for MockAllocations {
        async fn assign(
            &self,
            port_id: &Uuid,
            _subscription_id: &Uuid,
            _customer_id: &Uuid,
            _now_ms: u64,
        ) -> Result<AssignWrite, AllocationError> {
            self.assign_calls.lock().push(*port_id);
            self.assign_script
                .lock()
                .pop_front()
                .unwrap_or(Ok(AssignWrite::LostRace))
        }

        async fn reassign(
            &self,
            _port_id: &Uuid,
            _new_subscription_id: &Uuid,
            _operator_id: &Uuid,
            _now_ms: u64,
        ) -> Result<Port, AllocationError> {
            unimplemented!("not exercised by these tests")
        }

        async fn release(
            &self,
            port_id: &Uuid,
            operator_id: Option<&Uuid>,
            _now_ms: u64,
        ) -> Result<ReleaseReport, AllocationError> {
            self.release_calls
                .lock()
                .push((*port_id, operator_id.copied()));
            Ok(ReleaseReport {
                port_id: *port_id,
                cleared_subscription: None,
                changed: *self.release_changed.lock(),
            })
        }
    }

    #[derive(Default)]
    struct MockPorts {
        available: Mutex<Vec<Port>>,
        by_id: Mutex<HashMap<Uuid, Port>>,
    }

    #[async_trait]
    impl PortRepository for MockPorts {
        async fn create(
            &self,
            _descriptor: &PortDescriptor,
            _operator_id: &Uuid,
            _now_ms: u64,
        ) -> Result<Port, AllocationError> {
            unimplemented!("not exercised by these tests")
        }

        async fn fetch_by_id(&self, port_id: &Uuid) -> Result<Option<Port>, AllocationError> {
            Ok(self.by_id.lock().get(port_id).cloned())
        }

        async fn fetch_by_url(&self, _url: &str) -> Result<Option<Port>, AllocationError> {
            unimplemented!("not exercised by these tests")
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
            unimplemented!("not exercised by these tests")
        }

        async fn set_state(
            &self,
            _port_id: &Uuid,
            _new_state: PortState,
            _operator_id: &Uuid,
        ) -> Result<Port, AllocationError> {
            unimplemented!("not exercised by these tests")
        }

        async fn delete(&self, _port_id: &Uuid) -> Result<(), AllocationError> {
            unimplemented!("not exercised by these tests")
        }
    }

    #[derive(Default)]
    struct MockSubs {
        fetch_script: Mutex<VecDeque<Option<Subscription>>>,
        status_calls: Mutex<Vec<(Uuid, SubscriptionStatus)>>,
        release_candidates: Mutex<Vec<Subscription>>,
    }

    #[async_trait]
    impl SubscriptionRepository for MockSubs {
        async fn create(
            &self,
            _new: &NewSubscription,
            _now_ms: u64,
        ) -> Result<Subscription, AllocationError> {
            unimplemented!("not exercised by these tests")
        }

        async fn fetch_by_id(
            &self,
            _subscription_id: &Uuid,
        ) -> Result<Option<Subscription>, AllocationError> {
            Ok(self.fetch_script.lock().pop_front().flatten())
        }

        async fn set_status(
            &self,
            subscription_id: &Uuid,
            status: SubscriptionStatus,
        ) -> Result<(), AllocationError> {
            self.status_calls.lock().push((*subscription_id, status));
            Ok(())
        }

        async fn fetch_release_candidates(
            &self,
            limit: usize,
        ) -> Result<Vec<Subscription>, AllocationError> {
            Ok(self
                .release_candidates
                .lock()
                .iter()
                .take(limit)
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        calls: Mutex<Vec<Uuid>>,
        fail: bool,
    }

    #[async_trait]
    impl CapacityNotifier for RecordingNotifier {
        async fn notify_exhausted(&self, subscription_id: Uuid) -> anyhow::Result<()> {
            self.calls.lock().push(subscription_id);
            if self.fail {
                anyhow::bail!("webhook endpoint unreachable")
            }
            Ok(())
        }
    }

    struct Fixture {
        allocations: Arc<MockAllocations>,
        ports: Arc<MockPorts>,
        subs: Arc<MockSubs>,
        notifier: Arc<RecordingNotifier>,
        engine: AllocationEngine,
    }

    fn fixture_with_notifier(notifier: RecordingNotifier) -> Fixture {
        let allocations = Arc::new(MockAllocations::default());
        let ports = Arc::new(MockPorts::default());
        let subs = Arc::new(MockSubs::default());
        let notifier = Arc::new(notifier);

        let engine = AllocationEngine::new(
            allocations.clone(),
            ports.clone(),
            subs.clone(),
            notifier.clone(),
            Counters::default(),
            4,
        );

        Fixture {
            allocations,
            ports,
            subs,
            notifier,
            engine,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_notifier(RecordingNotifier::default())
    }

    #[tokio::test]
    async fn missing_subscription_is_not_found() {
        let f = fixture();
        let id = Uuid::new_v4();

        let err = f.engine.allocate_for_subscription(&id).await.unwrap_err();
        assert!(matches!(err, AllocationError::SubscriptionNotFound(s) if s == id));
    }

    #[tokio::test]
    async fn existing_assignment_is_returned_without_new_writes() {
        let f = fixture();
        let sub_id = Uuid::new_v4();
        let port = mk_assigned_port(Uuid::new_v4(), sub_id, Uuid::new_v4());

        f.ports.by_id.lock().insert(port.port_id, port.clone());
        f.subs
            .fetch_script
            .lock()
            .push_back(Some(mk_sub(sub_id, Some(port.port_id))));

        let out = f.engine.allocate_for_subscription(&sub_id).await.unwrap();

        assert_eq!(out.port().unwrap().port_id, port.port_id);
        assert!(f.allocations.assign_calls.lock().is_empty());
        assert!(f.subs.status_calls.lock().is_empty());
        assert!(f.notifier.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn empty_pool_parks_subscription_and_notifies() {
        let f = fixture();
        let sub_id = Uuid::new_v4();
        f.subs.fetch_script.lock().push_back(Some(mk_sub(sub_id, None)));

        let out = f.engine.allocate_for_subscription(&sub_id).await.unwrap();

        assert!(matches!(out, AllocationOutcome::Pending));
        assert_eq!(
            f.subs.status_calls.lock().as_slice(),
            &[(sub_id, SubscriptionStatus::PendingAllocation)]
        );
        assert_eq!(f.notifier.calls.lock().as_slice(), &[sub_id]);
    }

    #[tokio::test]
    async fn lost_race_retries_next_candidate() {
        let f = fixture();
        let sub_id = Uuid::new_v4();
        let p1 = mk_port(Uuid::new_v4());
        let p2 = mk_port(Uuid::new_v4());

        f.subs.fetch_script.lock().push_back(Some(mk_sub(sub_id, None)));
        *f.ports.available.lock() = vec![p1.clone(), p2.clone()];
        {
            let mut script = f.allocations.assign_script.lock();
            script.push_back(Ok(AssignWrite::LostRace));
            script.push_back(Ok(AssignWrite::Committed(p2.clone())));
        }

        let out = f.engine.allocate_for_subscription(&sub_id).await.unwrap();

        assert_eq!(out.port().unwrap().port_id, p2.port_id);
        assert_eq!(
            f.allocations.assign_calls.lock().as_slice(),
            &[p1.port_id, p2.port_id]
        );
        assert!(f.subs.status_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn all_candidates_lost_parks_subscription() {
        let f = fixture();
        let sub_id = Uuid::new_v4();

        f.subs.fetch_script.lock().push_back(Some(mk_sub(sub_id, None)));
        *f.ports.available.lock() = vec![mk_port(Uuid::new_v4()), mk_port(Uuid::new_v4())];
        // assign_script empty: every attempt defaults to LostRace.

        let out = f.engine.allocate_for_subscription(&sub_id).await.unwrap();

        assert!(matches!(out, AllocationOutcome::Pending));
        assert_eq!(f.allocations.assign_calls.lock().len(), 2);
        assert_eq!(
            f.subs.status_calls.lock().as_slice(),
            &[(sub_id, SubscriptionStatus::PendingAllocation)]
        );
        assert_eq!(f.notifier.calls.lock().as_slice(), &[sub_id]);
    }

    #[tokio::test]
    async fn concurrent_winner_for_same_subscription_is_resolved_idempotently() {
        let f = fixture();
        let sub_id = Uuid::new_v4();
        let candidate = mk_port(Uuid::new_v4());
        let winner = mk_assigned_port(Uuid::new_v4(), sub_id, Uuid::new_v4());

        f.ports.by_id.lock().insert(winner.port_id, winner.clone());
        *f.ports.available.lock() = vec![candidate];
        {
            let mut script = f.subs.fetch_script.lock();
            script.push_back(Some(mk_sub(sub_id, None)));
            script.push_back(Some(mk_sub(sub_id, Some(winner.port_id))));
        }
        f.allocations
            .assign_script
            .lock()
            .push_back(Err(AllocationError::AlreadyAssigned(sub_id)));

        let out = f.engine.allocate_for_subscription(&sub_id).await.unwrap();

        assert_eq!(out.port().unwrap().port_id, winner.port_id);
        assert!(f.subs.status_calls.lock().is_empty());
    }

    #[traced_test]
    #[tokio::test]
    async fn notifier_failure_does_not_fail_allocation() {
        let f = fixture_with_notifier(RecordingNotifier {
            calls: Mutex::new(vec![]),
            fail: true,
        });
        let sub_id = Uuid::new_v4();
        f.subs.fetch_script.lock().push_back(Some(mk_sub(sub_id, None)));

        let out = f.engine.allocate_for_subscription(&sub_id).await.unwrap();

        assert!(matches!(out, AllocationOutcome::Pending));
        assert_eq!(
            f.subs.status_calls.lock().as_slice(),
            &[(sub_id, SubscriptionStatus::PendingAllocation)]
        );
        assert!(logs_contain("capacity notification failed"));
    }

    #[tokio::test]
    async fn sweep_releases_ports_of_terminated_subscriptions() {
        let f = fixture();
        *f.allocations.release_changed.lock() = true;

        let sub_id = Uuid::new_v4();
        let port = mk_assigned_port(Uuid::new_v4(), sub_id, Uuid::new_v4());
        f.ports.by_id.lock().insert(port.port_id, port.clone());

        let mut stale = mk_sub(sub_id, Some(port.port_id));
        stale.status = SubscriptionStatus::Expired;
        f.subs.release_candidates.lock().push(stale);

        let released = f.engine.sweep_expired(10).await.unwrap();

        assert_eq!(released, 1);
        // Automatic reclaim: never operator-attributed.
        assert_eq!(
            f.allocations.release_calls.lock().as_slice(),
            &[(port.port_id, None)]
        );
    }

    #[tokio::test]
    async fn sweep_skips_candidates_whose_release_is_noop() {
        let f = fixture();
        *f.allocations.release_changed.lock() = false;

        let sub_id = Uuid::new_v4();
        let port = mk_assigned_port(Uuid::new_v4(), sub_id, Uuid::new_v4());
        f.ports.by_id.lock().insert(port.port_id, port.clone());

        let mut stale = mk_sub(sub_id, Some(port.port_id));
        stale.status = SubscriptionStatus::Cancelled;
        f.subs.release_candidates.lock().push(stale);

        let released = f.engine.sweep_expired(10).await.unwrap();

        assert_eq!(released, 0);
        assert_eq!(f.allocations.release_calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn sweep_leaves_reassigned_ports_alone() {
        let f = fixture();
        *f.allocations.release_changed.lock() = true;

        // Candidate scan saw the expired subscription holding the port, but
        // an operator has since moved the port to a different subscription.
        let stale_sub = Uuid::new_v4();
        let port = mk_assigned_port(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        f.ports.by_id.lock().insert(port.port_id, port.clone());

        let mut stale = mk_sub(stale_sub, Some(port.port_id));
        stale.status = SubscriptionStatus::Expired;
        f.subs.release_candidates.lock().push(stale);

        let released = f.engine.sweep_expired(10).await.unwrap();

        assert_eq!(released, 0);
        assert!(f.allocations.release_calls.lock().is_empty());
    }
}
