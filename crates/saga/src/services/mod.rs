//! In-memory command handlers for the order-placement services.
//!
//! Each service owns an action command and its compensation, reports
//! HTTP-style results (`{"status": 200, ...}`) and has switches to make it
//! reject or fail for tests.

pub mod customer;
pub mod inventory;
pub mod order;

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use customer::InMemoryCustomerService;
pub use inventory::InMemoryInventoryService;
pub use order::InMemoryOrderService;

/// Result type tag the services' results are judged under.
pub const HTTP_STATUS: &str = "http-status";

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
