//! Credential directory.
//!
//! One text record per identity: the username on the first line, a salted,
//! iterated SHA-256 password hash on the second. Records are written
//! atomically; the identity must validate before it is ever used as a
//! file name.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::identity::{validate_identity, IdentityError};

pub const MIN_PASSWORD_LEN: usize = 4;

const HASH_TAG: &str = "sha256-iter";
const HASH_ITERATIONS: u32 = 50_000;
const SALT_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("password must be at least {MIN_PASSWORD_LEN} characters")]
    PasswordTooShort,

    #[error("identity '{user}' is already registered")]
    AlreadyRegistered { user: String },

    #[error("unknown identity '{user}'")]
    UnknownIdentity { user: String },

    #[error("failed to write credential record {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read credential record {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("credential record {path} is malformed")]
    Corrupt { path: PathBuf },
}

/// Flat-file username → password-hash directory.
pub struct CredentialDirectory {
    dir: PathBuf,
}

impl CredentialDirectory {
    /// Open (and create if needed) a directory store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CredentialError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| CredentialError::Write {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    fn path_for(&self, user: &str) -> Result<PathBuf, CredentialError> {
        validate_identity(user)?;
        Ok(self.dir.join(format!("{user}.txt")))
    }

    /// Register a new identity. Fails if the identity already exists;
    /// never overwrites.
    pub fn register(&self, user: &str, password: &str) -> Result<(), CredentialError> {
        let path = self.path_for(user)?;
        if password.len() < MIN_PASSWORD_LEN {
            return Err(CredentialError::PasswordTooShort);
        }
        if path.exists() {
            return Err(CredentialError::AlreadyRegistered {
                user: user.to_string(),
            });
        }

        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let record = format!("{user}\n{}\n", encode_hash(password, &salt, HASH_ITERATIONS));

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|source| CredentialError::Write {
            path: path.clone(),
            source,
        })?;
        tmp.write_all(record.as_bytes())
            .map_err(|source| CredentialError::Write {
                path: path.clone(),
                source,
            })?;
        tmp.persist(&path).map_err(|err| CredentialError::Write {
            path: path.clone(),
            source: err.error,
        })?;

        tracing::info!(user, "credential record created");
        Ok(())
    }

    /// Precondition gate used by the biometric flows.
    pub fn identity_exists(&self, user: &str) -> bool {
        self.path_for(user)
            .map(|path| path.exists())
            .unwrap_or(false)
    }

    /// Check a password against the stored hash. `UnknownIdentity` when no
    /// record exists; `Ok(false)` on a wrong password.
    pub fn verify_password(&self, user: &str, password: &str) -> Result<bool, CredentialError> {
        let path = self.path_for(user)?;
        if !path.exists() {
            return Err(CredentialError::UnknownIdentity {
                user: user.to_string(),
            });
        }

        let contents = fs::read_to_string(&path).map_err(|source| CredentialError::Read {
            path: path.clone(),
            source,
        })?;
        let stored = contents
            .lines()
            .nth(1)
            .ok_or(CredentialError::Corrupt { path: path.clone() })?;

        verify_hash(password, stored).ok_or(CredentialError::Corrupt { path })
    }

    /// All registered identities, sorted.
    pub fn list(&self) -> Result<Vec<String>, CredentialError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| CredentialError::Read {
            path: self.dir.clone(),
            source,
        })?;

        let mut users = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| CredentialError::Read {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                users.push(stem.to_string());
            }
        }

        users.sort();
        Ok(users)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// `sha256-iter$<iterations>$<salt-hex>$<digest-hex>`
fn encode_hash(password: &str, salt: &[u8], iterations: u32) -> String {
    let digest = iterate_hash(password, salt, iterations);
    format!(
        "{HASH_TAG}${iterations}${}${}",
        hex::encode(salt),
        hex::encode(digest)
    )
}

/// `None` when the stored hash does not parse; `Some(matched)` otherwise.
fn verify_hash(password: &str, stored: &str) -> Option<bool> {
    let mut parts = stored.split('$');
    if parts.next()? != HASH_TAG {
        return None;
    }
    let iterations: u32 = parts.next()?.parse().ok()?;
    let salt = hex::decode(parts.next()?).ok()?;
    let expected = hex::decode(parts.next()?).ok()?;

    let digest = iterate_hash(password, &salt, iterations);
    if expected.len() != digest.len() {
        return Some(false);
    }

    // Constant-time: fold all byte differences before the comparison.
    let diff = digest
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));
    Some(diff == 0)
}

fn iterate_hash(password: &str, salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    let mut digest: [u8; 32] = hasher.finalize().into();

    for _ in 1..iterations {
        digest = Sha256::digest(digest).into();
    }
    digest
}
