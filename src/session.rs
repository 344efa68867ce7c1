//! Identity of the caller.
//!
//! Authentication itself happens elsewhere; the gallery only asks "who is calling,
//! and with which role?" before every operation.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::StoreResult;
use crate::state::data::{Role, UserId};
use crate::state::store::RecordStore;

/// The resolved identity of the active caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub owner_id: UserId,
    pub role: Role,
}

impl Session {
    pub fn new(owner_id: UserId, role: Role) -> Self {
        Self { owner_id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Whether this session may read or modify data owned by `owner_id`
    pub fn can_access(&self, owner_id: UserId) -> bool {
        self.is_admin() || self.owner_id == owner_id
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The active session, or `None` when nobody is signed in
    async fn current_session(&self) -> StoreResult<Option<Session>>;
}

/// A fixed identity, resolved up front
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(pub Option<Session>);

impl StaticIdentity {
    pub fn signed_in(session: Session) -> Self {
        Self(Some(session))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_session(&self) -> StoreResult<Option<Session>> {
        Ok(self.0)
    }
}

/// Resolves a user id against the users table to obtain its role.
/// Unknown ids resolve to no session.
pub struct StoredUserIdentity {
    records: Arc<dyn RecordStore>,
    user_id: Option<UserId>,
}

impl StoredUserIdentity {
    pub fn new(records: Arc<dyn RecordStore>, user_id: Option<UserId>) -> Self {
        Self { records, user_id }
    }
}

#[async_trait]
impl IdentityProvider for StoredUserIdentity {
    async fn current_session(&self) -> StoreResult<Option<Session>> {
        let Some(user_id) = self.user_id else {
            return Ok(None);
        };

        let session = self
            .records
            .get_user(user_id)
            .await?
            .map(|user| Session::new(user.id, user.role));

        if session.is_none() {
            tracing::warn!(%user_id, "session user does not exist");
        }

        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::data::User;
    use crate::state::library::Library;
    use uuid::Uuid;

    #[test]
    fn test_admin_can_access_everything() {
        let admin = Session::new(Uuid::new_v4(), Role::Admin);
        let user = Session::new(Uuid::new_v4(), Role::User);
        assert!(admin.can_access(user.owner_id));
        assert!(!user.can_access(admin.owner_id));
        assert!(user.can_access(user.owner_id));
    }

    #[tokio::test]
    async fn test_stored_identity_resolves_role() {
        let library = Arc::new(Library::open_in_memory().unwrap());
        let admin = User::new("Root", "root@example.com", Role::Admin);
        library.insert_user(&admin).await.unwrap();

        let identity = StoredUserIdentity::new(library.clone(), Some(admin.id));
        let session = identity.current_session().await.unwrap().unwrap();
        assert!(session.is_admin());

        let unknown = StoredUserIdentity::new(library.clone(), Some(Uuid::new_v4()));
        assert_eq!(unknown.current_session().await.unwrap(), None);

        let nobody = StoredUserIdentity::new(library, None);
        assert_eq!(nobody.current_session().await.unwrap(), None);
    }
}
