//! Queue implementations behind the [`Scheduler`](crate::sched::Scheduler) trait
//!
//! - [`mutex::MutexQueue`] - condvar-based FIFO, exact size, simplest
//! - [`lockfree::LockFreeQueue`] - Michael-Scott MPMC with hazard pointers
//! - [`policy::PolicyQueue`] - sync/bound/overflow composed at the type level
//! - [`adaptive::AdaptiveQueue`] - starts mutex-based, promotes to lock-free
//!   under contention

pub mod adaptive;
pub mod lockfree;
pub mod mutex;
pub mod policy;

pub use adaptive::AdaptiveQueue;
pub use lockfree::LockFreeQueue;
pub use mutex::{MutexQueue, OverflowBehavior};
pub use policy::PolicyQueue;
