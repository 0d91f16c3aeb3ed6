//! User lifecycle events and the transport contract that carries them.

pub mod bus;
pub mod envelope;
pub mod in_memory_bus;
pub mod record;

pub use bus::{EventBus, Subscription};
pub use envelope::{EnvelopeError, EventType, MAX_VERSION, UserEvent, UserSnapshot};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use record::{events_topic, Acknowledge, DeliveryReceipt, Keyed, TransportRecord, USER_EVENTS_TOPIC};
