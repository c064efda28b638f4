//! Core System Infrastructure
//!
//! Services that are not BLE-specific: the fatal-condition funnel, timer
//! identity management and the persistent-store layout and access layer.

pub mod fault;
pub mod layout;
pub mod nvm;
pub mod timer;
