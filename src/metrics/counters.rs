use std::sync::Arc;
use std::sync::atomic::AtomicU64;

/// Minimal counters for operational visibility.
#[derive(Clone, Default)]
pub struct Counters {
    pub alloc_assigned: Arc<AtomicU64>,
    pub alloc_pending: Arc<AtomicU64>,
    pub alloc_conflicts: Arc<AtomicU64>,

    pub ports_reassigned: Arc<AtomicU64>,
    pub ports_released: Arc<AtomicU64>,
    pub sweep_released: Arc<AtomicU64>,
}
