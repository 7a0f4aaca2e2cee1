//! `metaex-events`: broker-backed notification fan-out.
//!
//! Configuration-change and catalog notifications arrive on external broker
//! channels; a [`Topic`] turns one channel into in-process callbacks.

pub mod bus;
pub mod in_memory_bus;
pub mod topic;

pub use bus::{BusError, Message, MessageStream, MessagingClient};
pub use in_memory_bus::InMemoryBroker;
pub use topic::{Subscriber, Topic};
