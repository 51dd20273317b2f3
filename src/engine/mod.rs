// Storage engine: cache regions, their population, and durable local state.

pub mod cache;
pub mod local_store;
mod populate;
