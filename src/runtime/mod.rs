pub mod engine;
pub mod execution;
pub mod history;
pub mod instance;
pub mod redis_store;
pub mod store;
pub mod token;
