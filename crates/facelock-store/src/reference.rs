//! Reference face storage.
//!
//! One PNG-encoded canonical image per identity, named by the identity
//! string. Saves go through a temp file in the store directory and are
//! persisted with a rename, so a concurrent load for the same identity
//! never observes a half-written record.

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use facelock_core::CanonicalFace;
use image::ImageFormat;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::identity::{validate_identity, IdentityError};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no face reference enrolled for identity '{identity}'")]
    NotFound { identity: String },

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("failed to write reference {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read reference {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode reference image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("reference {path} is not a valid canonical image: {message}")]
    Invalid { path: PathBuf, message: String },
}

/// Filesystem store of one canonical reference face per identity.
pub struct ReferenceStore {
    dir: PathBuf,
}

impl ReferenceStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Write {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    fn path_for(&self, identity: &str) -> Result<PathBuf, StoreError> {
        validate_identity(identity)?;
        Ok(self.dir.join(format!("{identity}.png")))
    }

    /// Persist `face` as the reference for `identity`, unconditionally
    /// overwriting any prior record.
    pub fn save(&self, identity: &str, face: &CanonicalFace) -> Result<(), StoreError> {
        let path = self.path_for(identity)?;

        let mut encoded = Vec::new();
        face.as_image()
            .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
            .map_err(StoreError::Encode)?;

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|source| StoreError::Write {
            path: path.clone(),
            source,
        })?;
        tmp.write_all(&encoded).map_err(|source| StoreError::Write {
            path: path.clone(),
            source,
        })?;
        tmp.as_file().sync_all().map_err(|source| StoreError::Write {
            path: path.clone(),
            source,
        })?;
        tmp.persist(&path).map_err(|err| StoreError::Write {
            path: path.clone(),
            source: err.error,
        })?;

        tracing::debug!(identity, path = %path.display(), "reference saved");
        Ok(())
    }

    /// Load the reference for `identity`, re-validating its dimensions.
    pub fn load(&self, identity: &str) -> Result<CanonicalFace, StoreError> {
        let path = self.path_for(identity)?;
        if !path.exists() {
            return Err(StoreError::NotFound {
                identity: identity.to_string(),
            });
        }

        let bytes = fs::read(&path).map_err(|source| StoreError::Read {
            path: path.clone(),
            source,
        })?;
        let decoded = image::load_from_memory(&bytes)
            .map_err(|err| StoreError::Invalid {
                path: path.clone(),
                message: err.to_string(),
            })?
            .to_rgb8();

        CanonicalFace::from_image(decoded).map_err(|err| StoreError::Invalid {
            path,
            message: err.to_string(),
        })
    }

    pub fn exists(&self, identity: &str) -> bool {
        self.path_for(identity)
            .map(|path| path.exists())
            .unwrap_or(false)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facelock_core::{CANONICAL_HEIGHT, CANONICAL_WIDTH};
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn face_filled_with(value: u8) -> CanonicalFace {
        let img = RgbImage::from_pixel(CANONICAL_WIDTH, CANONICAL_HEIGHT, Rgb([value, value, value]));
        CanonicalFace::from_image(img).unwrap()
    }

    #[test]
    fn save_then_load_round_trips() {
        let tmp = TempDir::new().unwrap();
        let store = ReferenceStore::open(tmp.path().join("refs")).unwrap();

        store.save("ana", &face_filled_with(200)).unwrap();
        let loaded = store.load("ana").unwrap();
        assert_eq!(loaded.as_image().get_pixel(0, 0).0, [200, 200, 200]);
    }

    #[test]
    fn load_without_record_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = ReferenceStore::open(tmp.path()).unwrap();
        let err = store.load("ana").unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn exists_tracks_saves() {
        let tmp = TempDir::new().unwrap();
        let store = ReferenceStore::open(tmp.path()).unwrap();
        assert!(!store.exists("ana"));
        store.save("ana", &face_filled_with(10)).unwrap();
        assert!(store.exists("ana"));
    }

    #[test]
    fn resave_fully_replaces_the_prior_record() {
        let tmp = TempDir::new().unwrap();
        let store = ReferenceStore::open(tmp.path()).unwrap();

        store.save("ana", &face_filled_with(10)).unwrap();
        store.save("ana", &face_filled_with(240)).unwrap();

        let loaded = store.load("ana").unwrap();
        assert_eq!(loaded.as_image().get_pixel(0, 0).0, [240, 240, 240]);
    }

    #[test]
    fn identities_map_to_distinct_files() {
        let tmp = TempDir::new().unwrap();
        let store = ReferenceStore::open(tmp.path()).unwrap();

        store.save("ana", &face_filled_with(10)).unwrap();
        store.save("bob", &face_filled_with(20)).unwrap();

        assert_eq!(store.load("ana").unwrap().as_image().get_pixel(0, 0).0[0], 10);
        assert_eq!(store.load("bob").unwrap().as_image().get_pixel(0, 0).0[0], 20);
    }

    #[test]
    fn traversal_identities_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = ReferenceStore::open(tmp.path()).unwrap();
        let err = store.save("../../escape", &face_filled_with(1)).unwrap_err();
        assert!(matches!(err, StoreError::Identity(_)));
        assert!(!store.exists("../../escape"));
    }

    #[test]
    fn corrupt_record_is_reported_invalid() {
        let tmp = TempDir::new().unwrap();
        let store = ReferenceStore::open(tmp.path()).unwrap();
        fs::write(tmp.path().join("ana.png"), b"not a png").unwrap();
        let err = store.load("ana").unwrap_err();
        assert!(matches!(err, StoreError::Invalid { .. }));
    }
}
