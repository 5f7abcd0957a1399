//! Identity validation.
//!
//! The identity string is the sole storage key for both the credential
//! record and the reference image, so the character set is restricted to
//! keep file naming collision-free and traversal-safe.

use thiserror::Error;

pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("invalid username '{user}': {reason}")]
    Invalid { user: String, reason: String },
}

pub fn validate_identity(user: &str) -> Result<(), IdentityError> {
    if user.len() < MIN_USERNAME_LEN {
        return Err(IdentityError::Invalid {
            user: user.to_string(),
            reason: format!("must be at least {MIN_USERNAME_LEN} characters"),
        });
    }

    if user.len() > MAX_USERNAME_LEN {
        return Err(IdentityError::Invalid {
            user: user.to_string(),
            reason: format!("must be at most {MAX_USERNAME_LEN} characters"),
        });
    }

    if !user
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
    {
        return Err(IdentityError::Invalid {
            user: user.to_string(),
            reason: "use ASCII letters, numbers, '-' or '_' only".into(),
        });
    }

    Ok(())
}
