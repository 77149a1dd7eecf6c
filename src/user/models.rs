use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One record per signed-in identity, created lazily on first use
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserModel {
    pub uid: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserModel {
    pub fn new(uid: &str, display_name: &str, at: DateTime<Utc>) -> Self {
        Self {
            uid: uid.to_string(),
            display_name: display_name.to_string(),
            created_at: at,
            updated_at: at,
        }
    }
}
