pub mod extractors;
pub mod middleware;
pub mod password;
pub mod token;

use serde::Deserialize;
use validator::Validate;

pub use extractors::AuthenticatedUser;
pub use middleware::AuthMiddleware;
pub use password::{hash_password, verify_password};
pub use token::{Claims, TokenIssuer};

/// Header carrying the session token, on requests and on signup/login responses.
pub const AUTH_HEADER: &str = "x-auth";

/// Access scope of session tokens.
pub const ACCESS_AUTH: &str = "auth";

/// Payload of both signup and login requests.
#[derive(Debug, Deserialize, Validate)]
pub struct Credentials {
    /// Must be a valid email address once surrounding whitespace is trimmed.
    #[validate(
        length(min = 1, message = "Email is required"),
        email(message = "Email is not a valid email address")
    )]
    pub email: String,
    /// Must be at least 6 characters long.
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
}

impl Credentials {
    /// Trims the email the way it is stored, so lookups and uniqueness ignore stray spaces.
    pub fn normalized(mut self) -> Self {
        self.email = self.email.trim().to_string();
        self
    }
}
