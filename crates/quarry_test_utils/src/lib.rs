//! Shared test scaffolding: fixture pages, a scripted driver that serves
//! them, and counters for asserting driver behavior. No network anywhere.

pub mod fixtures;
pub mod scripted;

pub use quarry_ai::LocalAi;
pub use scripted::{DriverCounters, FixturePage, FixtureSite, ScriptedDriverFactory};
