mod extractors;
mod jwt;
mod password;

pub use extractors::{AppState, CurrentUser, FromRef};
pub use jwt::{create_access_token, decode_access_token, Claims};
pub use password::{hash_password, verify_password};
