//! Home climate service: serves temperature and humidity history from a
//! weather-station archive, evaluates per-sensor thresholds and notifies
//! registered targets when a room goes out of bounds.

pub mod alerts;
pub mod api;
pub mod assets;
pub mod config;
pub mod db;
pub mod documents;
pub mod error;
pub mod home;
pub mod notify;
pub mod poll;
pub mod telemetry;
