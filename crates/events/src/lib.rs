//! Fleet statistics messages and pub/sub mechanics.

pub mod bus;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use event::{AggregateChanged, Event, VehicleBatch};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
