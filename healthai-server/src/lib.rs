//! `HealthAI` server library.
//!
//! Exposes the room relay, model store and HTTP router for use in tests and
//! embedding. The relay accepts WebSocket connections at `/ws`, tracks room
//! membership, and fans chat events out to room members.

pub mod config;
pub mod models;
pub mod relay;
pub mod rooms;
pub mod routes;
pub mod server;
