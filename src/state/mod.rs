//! Runtime state management

pub mod model;

pub use model::RuntimeState;
