//! Image Realism Enhancement Engine
//!
//! This library provides the core functionality for the realism-engine
//! backend, which analyzes uploaded images for AI-generation artifacts and
//! produces a structured enhancement plan through a staged pipeline:
//! scene classification, fake-signal detection, constraint retrieval,
//! strategy generation, execution planning, and realism scoring.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod services;
