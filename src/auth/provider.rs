use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use super::types::AuthUser;

/// Client-side view of who is signed in
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn current_user(&self) -> Option<AuthUser>;
    async fn sign_in(&self, user: AuthUser);
    async fn sign_out(&self);
}

/// Holds the signed-in user in memory
#[derive(Default)]
pub struct StaticAuthProvider {
    user: RwLock<Option<AuthUser>>,
}

impl StaticAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(user: AuthUser) -> Self {
        Self {
            user: RwLock::new(Some(user)),
        }
    }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    async fn current_user(&self) -> Option<AuthUser> {
        self.user.read().await.clone()
    }

    async fn sign_in(&self, user: AuthUser) {
        info!(uid = %user.uid, "Signed in");
        *self.user.write().await = Some(user);
    }

    async fn sign_out(&self) {
        if let Some(user) = self.user.write().await.take() {
            info!(uid = %user.uid, "Signed out");
        }
    }
}
