/// Authentication and authorization
///
/// # Modules
///
/// - [`password`]: Argon2id hashing and verification
/// - [`jwt`]: HS256 access and refresh claims, zero-leeway decoding
/// - [`token_service`]: token issuance, verification, revocation and the
///   per-user refresh-token cap
/// - [`session`]: register / login / refresh / logout / get-self
/// - [`authorization`]: role policy for posts
/// - [`middleware`]: the request [`middleware::AuthContext`] and bearer parsing
///
/// # Security Features
///
/// - **Separate secrets** for access and refresh tokens, validated at startup
/// - **Server-side refresh tokens**: revocable, capped, lazily swept
/// - **Uniform rejections**: every refresh failure reads the same, and login
///   does not reveal whether an email exists

pub mod authorization;
pub mod jwt;
pub mod middleware;
pub mod password;
pub mod session;
pub mod token_service;
