//! Adapters behind the domain ports: storage, payment gateway, event bus.

pub mod bus;
pub mod gateway;
pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
