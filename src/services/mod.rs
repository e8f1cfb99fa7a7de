pub mod allocator;
pub mod entitlements;
pub mod idempotency;
pub mod invoices;
pub mod sweeper;
pub mod webhook_processor;
