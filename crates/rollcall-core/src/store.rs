//! Identity store: one embedding and one face image per registered identity.
//!
//! On disk the store is a flat directory:
//!
//! ```text
//! <root>/<identifier>_<name>.npy          embedding, float32 vector
//! <root>/images/<identifier>_<name>.jpg   aligned face crop
//! ```
//!
//! The identifier prefix of each file stem is the uniqueness key. `put`
//! stages the new files, removes every entry with the same identifier, then
//! renames the staged files into place.

use crate::key::IdentityKey;
use crate::npy::{self, NpyError};
use crate::types::Embedding;
use image::{ImageFormat, RgbImage};
use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use tempfile::NamedTempFile;

const EMBEDDING_EXT: &str = "npy";
const IMAGE_EXT: &str = "jpg";
const IMAGE_DIR: &str = "images";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode face image: {0}")]
    ImageEncode(#[from] image::ImageError),
    #[error("invalid embedding file {path}: {source}")]
    Embedding {
        path: PathBuf,
        #[source]
        source: NpyError,
    },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A persisted identity and its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityRecord {
    pub key: IdentityKey,
    pub embedding: Embedding,
}

/// Outcome of [`IdentityStore::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutStatus {
    /// No entry existed for the identifier.
    Registered,
    /// An entry for the identifier was superseded.
    Updated { previous: IdentityKey },
}

/// Persistence for identity records.
pub trait IdentityStore {
    /// Supersede any entry sharing `key`'s identifier, then store the new record.
    fn put(&self, key: &IdentityKey, embedding: &Embedding, face: &RgbImage) -> Result<PutStatus, StoreError>;

    /// Every stored record. Order is unspecified.
    fn scan(&self) -> Result<Vec<IdentityRecord>, StoreError>;

    /// The stored key for `identifier`, if one is registered.
    fn exists_by_identifier(&self, identifier: &str) -> Result<Option<IdentityKey>, StoreError>;

    /// Stored keys, sorted.
    fn list(&self) -> Result<Vec<IdentityKey>, StoreError>;
}

/// A stored entry as found on disk. The stem is kept separately from the key
/// so files whose stem does not round-trip through `IdentityKey` (no
/// separator) are still addressed by their real name.
#[derive(Debug, Clone)]
struct Entry {
    key: IdentityKey,
    stem: String,
}

/// Directory-backed identity store.
///
/// Writers take the lock exclusively; readers share it, so a scan never sees
/// a record half-way through being superseded.
#[derive(Debug)]
pub struct FsIdentityStore {
    root: PathBuf,
    image_dir: PathBuf,
    lock: RwLock<()>,
}

impl FsIdentityStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let image_dir = root.join(IMAGE_DIR);
        fs::create_dir_all(&image_dir).map_err(|e| StoreError::io(&image_dir, e))?;

        tracing::info!(root = %root.display(), "identity store opened");
        Ok(Self {
            root,
            image_dir,
            lock: RwLock::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the embedding file for `key`.
    pub fn embedding_path(&self, key: &IdentityKey) -> PathBuf {
        self.embedding_path_for_stem(&key.to_string())
    }

    /// Path of the stored face image for `key`.
    pub fn image_path(&self, key: &IdentityKey) -> PathBuf {
        self.image_path_for_stem(&key.to_string())
    }

    fn embedding_path_for_stem(&self, stem: &str) -> PathBuf {
        self.root.join(format!("{stem}.{EMBEDDING_EXT}"))
    }

    fn image_path_for_stem(&self, stem: &str) -> PathBuf {
        self.image_dir.join(format!("{stem}.{IMAGE_EXT}"))
    }

    /// List embedding files. Unreadable directory entries and stems that are
    /// not valid keys are logged and skipped.
    fn entries(&self) -> Result<Vec<Entry>, StoreError> {
        let dir = fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))?;

        let mut entries = Vec::new();
        for item in dir {
            let item = match item {
                Ok(item) => item,
                Err(err) => {
                    tracing::warn!(root = %self.root.display(), error = %err, "skipping unreadable directory entry");
                    continue;
                }
            };
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EMBEDDING_EXT) || !path.is_file() {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                tracing::warn!(path = %path.display(), "skipping non UTF-8 embedding file name");
                continue;
            };
            match IdentityKey::parse(stem) {
                Ok(key) => entries.push(Entry {
                    key,
                    stem: stem.to_string(),
                }),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping embedding file with invalid key");
                }
            }
        }
        Ok(entries)
    }

    /// Delete an entry's files. Failures are logged, never returned.
    fn remove_entry(&self, entry: &Entry) {
        for path in [
            self.embedding_path_for_stem(&entry.stem),
            self.image_path_for_stem(&entry.stem),
        ] {
            match fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "removed superseded file"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "failed to remove superseded file");
                }
            }
        }
    }

    /// Encode both files of a record and write them to synced temp files
    /// beside their final paths.
    fn stage_record(
        &self,
        key: &IdentityKey,
        embedding: &Embedding,
        face: &RgbImage,
    ) -> Result<StagedRecord, StoreError> {
        let mut jpeg = Cursor::new(Vec::new());
        face.write_to(&mut jpeg, ImageFormat::Jpeg)?;

        Ok(StagedRecord {
            image: Staged::write(self.image_path(key), jpeg.get_ref())?,
            embedding: Staged::write(self.embedding_path(key), &npy::encode_f32(&embedding.values))?,
        })
    }

    fn load_embedding(&self, entry: &Entry) -> Result<Embedding, StoreError> {
        let path = self.embedding_path_for_stem(&entry.stem);
        let bytes = fs::read(&path).map_err(|e| StoreError::io(&path, e))?;
        let values = npy::decode_f32(&bytes).map_err(|source| StoreError::Embedding { path, source })?;
        Ok(Embedding {
            values,
            model_version: None,
        })
    }
}

impl IdentityStore for FsIdentityStore {
    fn put(&self, key: &IdentityKey, embedding: &Embedding, face: &RgbImage) -> Result<PutStatus, StoreError> {
        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);

        // Everything that can fail on content or path happens before any
        // existing entry is touched.
        let staged = self.stage_record(key, embedding, face)?;

        let superseded: Vec<Entry> = self
            .entries()?
            .into_iter()
            .filter(|entry| entry.key.identifier() == key.identifier())
            .collect();
        for entry in &superseded {
            self.remove_entry(entry);
        }

        staged.commit()?;

        let status = match superseded.into_iter().next() {
            Some(previous) => {
                tracing::info!(key = %key, previous = %previous.key, "identity updated");
                PutStatus::Updated { previous: previous.key }
            }
            None => {
                tracing::info!(key = %key, "identity registered");
                PutStatus::Registered
            }
        };
        Ok(status)
    }

    fn scan(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);

        let entries = self.entries()?;
        let mut records = Vec::with_capacity(entries.len());
        for entry in entries {
            match self.load_embedding(&entry) {
                Ok(embedding) => records.push(IdentityRecord {
                    key: entry.key,
                    embedding,
                }),
                Err(err) => tracing::warn!(key = %entry.key, error = %err, "skipping unreadable embedding"),
            }
        }
        Ok(records)
    }

    fn exists_by_identifier(&self, identifier: &str) -> Result<Option<IdentityKey>, StoreError> {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);

        let identifier = identifier.trim();
        Ok(self
            .entries()?
            .into_iter()
            .find(|entry| entry.key.identifier() == identifier)
            .map(|entry| entry.key))
    }

    fn list(&self) -> Result<Vec<IdentityKey>, StoreError> {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);

        let mut keys: Vec<IdentityKey> = self.entries()?.into_iter().map(|e| e.key).collect();
        keys.sort();
        Ok(keys)
    }
}

/// A file written and synced under a temporary name in its final directory.
/// Dropping it without persisting removes the temp file.
struct Staged {
    tmp: NamedTempFile,
    path: PathBuf,
}

impl Staged {
    fn write(path: PathBuf, bytes: &[u8]) -> Result<Self, StoreError> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(parent).map_err(|e| StoreError::io(&path, e))?;

        let file = tmp.as_file_mut();
        file.write_all(bytes).map_err(|e| StoreError::io(&path, e))?;
        file.sync_all().map_err(|e| StoreError::io(&path, e))?;

        Ok(Self { tmp, path })
    }

    fn persist(self) -> Result<(), StoreError> {
        self.tmp
            .persist(&self.path)
            .map_err(|err| StoreError::io(&self.path, err.error))?;
        Ok(())
    }
}

/// Both files of a new record, staged but not yet visible.
struct StagedRecord {
    image: Staged,
    embedding: Staged,
}

impl StagedRecord {
    /// Rename image then embedding into place. If the embedding cannot be
    /// persisted the image is removed again so the record is all-or-nothing.
    fn commit(self) -> Result<(), StoreError> {
        let image_path = self.image.path.clone();
        self.image.persist()?;

        if let Err(err) = self.embedding.persist() {
            if let Err(cleanup) = fs::remove_file(&image_path) {
                tracing::warn!(path = %image_path.display(), error = %cleanup, "failed to remove orphaned face image");
            }
            return Err(err);
        }
        Ok(())
    }
}
