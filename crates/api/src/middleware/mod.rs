pub mod auth;

pub use auth::{bearer_auth_middleware, session_auth_middleware, CurrentClaims, CurrentUser};
