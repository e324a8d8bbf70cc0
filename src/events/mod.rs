pub mod bus;
pub mod event;

pub use bus::{BusConfig, EventBus, OverflowPolicy, Subscription};
pub use event::{ChangeEvent, ChangeKind};
