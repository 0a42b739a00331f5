//! Queue orchestration
//!
//! The public face of the command queue plus the background tasks that keep it
//! draining. See [`CommandQueue`] for the enqueue/execute lifecycle and
//! [`QueueDrivers`] for driver shutdown.

pub mod drivers;
pub mod queue;

pub use drivers::QueueDrivers;
pub use queue::{CommandQueue, SweepTrigger};
