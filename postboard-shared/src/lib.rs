//! # Postboard Shared Library
//!
//! Domain logic for the Postboard API: accounts and sessions, posts, search,
//! image storage and subscription billing. The HTTP layer lives in
//! `postboard-api`; everything here is transport-agnostic.
//!
//! ## Module Organization
//!
//! - `models`: Database models and sqlx queries
//! - `db`: Connection pool and embedded migrations
//! - `store`: Persistence traits with Postgres and in-memory implementations
//! - `auth`: Passwords, JWTs, the session protocol and the post policy
//! - `posts`: Post CRUD with search indexing and image upload
//! - `search`: Typesense client
//! - `storage`: Supabase Storage client
//! - `billing`: Stripe checkout, webhooks and the post quota

pub mod auth;
pub mod billing;
pub mod db;
pub mod models;
pub mod posts;
pub mod search;
pub mod storage;
pub mod store;

/// Current version of the Postboard shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
