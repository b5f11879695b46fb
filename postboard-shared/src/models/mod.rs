/// Database models for Postboard
///
/// Each model owns its row type and the sqlx queries against its table.
/// Services do not call these directly; they go through the store traits in
/// [`crate::store`], whose Postgres implementation delegates here.
///
/// # Models
///
/// - `user`: accounts, the closed [`user::Role`] enum and first-admin assignment
/// - `refresh_token`: server-side refresh tokens with capped insertion
/// - `post`: posts, the author projection and paging
/// - `subscription`: Stripe-backed billing state per user

pub mod post;
pub mod refresh_token;
pub mod subscription;
pub mod user;
