pub mod fcm;
pub mod health;
pub mod memory;
pub mod notifier;
pub mod redis;
pub mod store;
