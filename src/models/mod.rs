//! Domain model module declarations.

pub mod directive;
pub mod notification;
pub mod outcome;
pub mod session;
pub mod status;
