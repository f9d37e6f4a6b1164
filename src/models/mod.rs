pub mod event;
pub mod fcm;
pub mod health;
pub mod metrics;
pub mod response;
pub mod retry;
