//! Status event bus: live transitions for the UI plus a latest-per-entity
//! snapshot for late or lagging subscribers.

mod bus;
mod event;

pub use bus::{DEFAULT_CAPACITY, StatusBus, StatusSubscription};
pub use event::{EntityKind, StatusEvent};
