/// API route handlers
///
/// This module contains all route handlers organized by resource:
///
/// - `health`: Health check endpoint
/// - `auth`: Session endpoints (register, login, refresh, logout, me)
/// - `posts`: Post CRUD and search
/// - `subscriptions`: Stripe checkout, portal and webhook

pub mod auth;
pub mod health;
pub mod posts;
pub mod subscriptions;
