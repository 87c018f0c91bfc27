pub mod bus;
pub mod planner;
pub mod recorder;
pub mod transport;
pub mod worker;

pub use bus::{EventBus, EventHandler};
pub use planner::{Delivery, NotifySettings, PushAction, PushExtra};
pub use recorder::ActivityRecorder;
pub use transport::Transport;
pub use worker::Notifier;
