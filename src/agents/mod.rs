/// Agent data model: status, resources, performance, health.
pub mod agent;

pub use agent::*;
