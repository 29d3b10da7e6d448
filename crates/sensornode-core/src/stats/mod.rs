//! Pipeline statistics
//!
//! Lock-free counters updated from the interrupt handler and the tasks
//! ([`counters`]), with a serializable point-in-time snapshot.

pub mod counters;
