pub mod engine;
pub mod event_bus;
pub mod loop_control;
pub mod state;

pub use engine::{Orchestrator, RunReport};
pub use event_bus::{EventBus, RunEvent};
pub use loop_control::CancelFlag;
