// Public API - what other modules can use
pub use handlers::sign_in;
pub use middleware::jwt_auth;
pub use provider::{AuthProvider, StaticAuthProvider};
pub use token::TokenConfig;
pub use types::{AuthClaims, AuthUser, SignInRequest, SignInResponse};

pub mod generators;
mod handlers;
mod middleware;
mod provider;
mod token;
mod types;
