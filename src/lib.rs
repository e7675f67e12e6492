//! Outbreak simulation and risk-scoring engine.
//!
//! Each tick advances every tracked city by one simulated day: the city's
//! lifecycle supplies admissions drift, the feature engine builds the new row,
//! and the model bundle scores it. Readers see whole days only.

pub mod dashboard;
pub mod data;
pub mod engine;
pub mod error;
pub mod features;
pub mod feed;
pub mod lifecycle;
pub mod logging;
pub mod models;
pub mod records;
pub mod risk;
pub mod scenario;
pub mod state;
pub mod store;
