pub mod config;
pub mod memory;
pub mod notifier;
pub mod postgres;
pub mod signature;
