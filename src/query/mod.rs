pub mod builder;
pub mod error;
pub mod executor;
pub mod operators;
pub mod plan;
