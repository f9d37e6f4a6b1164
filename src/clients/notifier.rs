use std::{fmt, future::Future};

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationTarget {
    Token(String),
    Topic(String),
}

impl fmt::Display for NotificationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationTarget::Token(_) => write!(f, "token"),
            NotificationTarget::Topic(topic) => write!(f, "topic:{}", topic),
        }
    }
}

/// Push transport used by the worker. Any error is treated as retryable.
pub trait Notifier: Send + Sync + 'static {
    fn send(
        &self,
        target: &NotificationTarget,
        title: &str,
        body: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}
