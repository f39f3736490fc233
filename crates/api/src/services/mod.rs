//! External service integrations.

pub mod notification;

pub use notification::{NotificationError, NotificationListener};
