pub mod catalog;
pub mod error;
pub mod game;
pub mod id;
pub mod ledger;
pub mod money;
pub mod notify;
pub mod slot;
pub mod subscription;
pub mod transaction;
pub mod user;
pub mod webhook;
