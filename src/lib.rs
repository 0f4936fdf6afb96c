pub mod behaviors;
pub mod error;
pub mod expr;
pub mod graph;
pub mod runtime;
