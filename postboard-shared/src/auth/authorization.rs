/// Post authorization policy
///
/// Authentication happens first, in the API's guard. These checks run second,
/// inside the post service, after the target post is known to exist.
///
/// | Action | ADMIN        | CUSTOMER  |
/// |--------|--------------|-----------|
/// | List   | every post   | own posts |
/// | Update | own posts    | own posts |
/// | Delete | every post   | own posts |
///
/// Every decision matches [`Role`] exhaustively, so adding a role is a
/// compile error here until the policy says what it may do.
///
/// # Example
///
/// ```
/// use postboard_shared::auth::authorization::{list_scope, require, PostAction, PostScope};
/// use postboard_shared::auth::middleware::AuthContext;
/// use postboard_shared::models::user::Role;
/// use uuid::Uuid;
///
/// let admin = AuthContext { user_id: Uuid::new_v4(), email: "a@x.com".into(), role: Role::Admin };
/// assert_eq!(list_scope(&admin), PostScope::All);
///
/// let someone_else = Uuid::new_v4();
/// assert!(require(&admin, PostAction::Delete, someone_else).is_ok());
/// assert!(require(&admin, PostAction::Update, someone_else).is_err());
/// ```

use std::fmt;
use uuid::Uuid;

use super::middleware::AuthContext;
use crate::models::user::Role;

/// Error type for authorization checks
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthzError {
    /// Authenticated, but not allowed to act on this post
    #[error("You are not allowed to {action} this post")]
    Forbidden { action: PostAction },
}

/// Mutating actions on a single post
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostAction {
    Update,
    Delete,
}

impl fmt::Display for PostAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostAction::Update => f.write_str("update"),
            PostAction::Delete => f.write_str("delete"),
        }
    }
}

/// Which posts a listing may include
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostScope {
    All,
    OwnedBy(Uuid),
}

impl PostScope {
    /// Author filter for the store query
    pub fn author_filter(&self) -> Option<Uuid> {
        match self {
            PostScope::All => None,
            PostScope::OwnedBy(id) => Some(*id),
        }
    }
}

pub fn list_scope(auth: &AuthContext) -> PostScope {
    match auth.role {
        Role::Admin => PostScope::All,
        Role::Customer => PostScope::OwnedBy(auth.user_id),
    }
}

pub fn can(auth: &AuthContext, action: PostAction, owner_id: Uuid) -> bool {
    let is_owner = auth.user_id == owner_id;
    match (action, auth.role) {
        (PostAction::Update, Role::Admin | Role::Customer) => is_owner,
        (PostAction::Delete, Role::Admin) => true,
        (PostAction::Delete, Role::Customer) => is_owner,
    }
}

pub fn require(auth: &AuthContext, action: PostAction, owner_id: Uuid) -> Result<(), AuthzError> {
    if can(auth, action, owner_id) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden { action })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(role: Role) -> AuthContext {
        AuthContext {
            user_id: Uuid::new_v4(),
            email: "u@x.com".to_string(),
            role,
        }
    }

    #[test]
    fn test_list_scope() {
        let admin = context(Role::Admin);
        let customer = context(Role::Customer);

        assert_eq!(list_scope(&admin), PostScope::All);
        assert_eq!(list_scope(&admin).author_filter(), None);
        assert_eq!(list_scope(&customer), PostScope::OwnedBy(customer.user_id));
        assert_eq!(list_scope(&customer).author_filter(), Some(customer.user_id));
    }

    #[test]
    fn test_policy_matrix() {
        for role in [Role::Admin, Role::Customer] {
            let auth = context(role);
            let other = Uuid::new_v4();

            // Owners may always update and delete
            assert!(can(&auth, PostAction::Update, auth.user_id));
            assert!(can(&auth, PostAction::Delete, auth.user_id));

            // Nobody updates someone else's post
            assert!(!can(&auth, PostAction::Update, other));

            // Only admins delete someone else's post
            assert_eq!(can(&auth, PostAction::Delete, other), role == Role::Admin);
        }
    }

    #[test]
    fn test_require_error_message() {
        let customer = context(Role::Customer);
        let err = require(&customer, PostAction::Delete, Uuid::new_v4()).unwrap_err();

        assert_eq!(err, AuthzError::Forbidden { action: PostAction::Delete });
        assert_eq!(err.to_string(), "You are not allowed to delete this post");
    }
}
