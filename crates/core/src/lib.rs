//! Shared domain types for the maintenance platform.
//!
//! Both the API (producer side) and the worker (consumer side) depend on
//! this crate so the notification payload has one definition.

pub mod error;
pub mod notification;
pub mod types;
