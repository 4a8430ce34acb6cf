pub mod device;
pub mod device_store;
pub mod registry;
