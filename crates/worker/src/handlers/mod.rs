//! One module per message classification.

pub mod notification;
