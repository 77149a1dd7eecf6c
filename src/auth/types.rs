use serde::{Deserialize, Serialize};

/// JWT claims identifying a signed-in learner
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthClaims {
    pub sub: String,
    pub name: String,
    pub exp: usize,
    pub iat: usize,
}

/// The authenticated caller, placed in request extensions by `jwt_auth`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub uid: String,
    pub display_name: String,
}

impl From<AuthClaims> for AuthUser {
    fn from(claims: AuthClaims) -> Self {
        Self {
            uid: claims.sub,
            display_name: claims.name,
        }
    }
}

/// Body of `POST /session`. The uid is never taken from the body; a missing
/// name gets a generated one.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignInRequest {
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignInResponse {
    pub token: String,
    pub uid: String,
    pub display_name: String,
}
