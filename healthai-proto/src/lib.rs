//! Shared protocol definitions for the `HealthAI` chat relay wire format.

pub mod codec;
pub mod event;
