//! Background task execution
//!
//! - `types`: task kinds, states and the status view
//! - `store`: task records guarded by the state machine
//! - `progress`: per-task progress pub/sub
//! - `engine`: submission, execution, cancellation

pub mod engine;
pub mod progress;
pub mod store;
pub mod types;

pub use engine::{TaskEngine, TaskProcessor};
pub use progress::ProgressChannel;
pub use store::TaskStore;
pub use types::*;
