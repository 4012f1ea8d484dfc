//! # Producer Queues
//!
//! Each application thread owns one [`SpscQueue`]; the backend worker is the
//! only consumer of all of them.

mod spsc;

pub use spsc::{CachePadded, Candidate, SpscQueue};
