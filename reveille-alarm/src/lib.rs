//! Alarm clock engine.
//!
//! Holds a set of user-defined alarms, drives each through its lifecycle
//! (enabled, pre-alarm, firing, snoozed, dismissed) and keeps exactly one
//! wake timer armed for the earliest pending event.

pub mod alarm;
pub mod api;
pub mod api_client;
pub mod clock;
pub mod config;
pub mod error;
pub mod manager;
pub mod scheduler;
pub mod store;
pub mod time_watch;
pub mod tracing;
pub mod wake;
