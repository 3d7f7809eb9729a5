/// Task data model and the priority-ordered task queue.
pub mod task;

pub use task::*;
