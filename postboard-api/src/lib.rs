//! # Postboard API Server Library
//!
//! HTTP surface over `postboard-shared`.
//!
//! ## Modules
//!
//! - `app`: Application state and router builder
//! - `client`: Session client with retry-on-401
//! - `config`: Configuration management
//! - `cookies`: Refresh-token cookie helpers
//! - `error`: Error handling and HTTP response mapping
//! - `extract`: Json/Path/Query extractors that reject with `ApiError`
//! - `middleware`: Security headers
//! - `response`: Success envelope
//! - `routes`: API route handlers

pub mod app;
pub mod client;
pub mod config;
pub mod cookies;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod response;
pub mod routes;
