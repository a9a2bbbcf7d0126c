// state-tape-store-sqlite/src/blobs.rs
// ============================================================================
// Module: Media Blob Store
// Description: Content-addressed blob directory with mandatory TTL metadata.
// Purpose: Keep raw media out of the derived store, sharded by digest.
// Dependencies: state-tape-core, crate::store
// ============================================================================

//! ## Overview
//! Media blobs live under `media/<aa>/<sha256>.blob`, keyed by the first two
//! hex bytes of the digest. TTL metadata is mandatory and lives in the
//! metadata store; [`FileBlobStore::sweep_expired`] deletes only expired
//! media files and never touches records. Raw pixel bytes never enter the
//! derived store.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use state_tape_core::BlobStore;
use state_tape_core::DEFAULT_HASH_ALGORITHM;
use state_tape_core::MediaId;
use state_tape_core::StoreError;
use state_tape_core::Timestamp;
use state_tape_core::hash_bytes;

use crate::store::SqliteRecordStore;

// ============================================================================
// SECTION: Blob Store
// ============================================================================

/// Filesystem blob store with TTL metadata in the metadata database.
#[derive(Clone)]
pub struct FileBlobStore {
    /// Root of the `media/` directory.
    media_root: PathBuf,
    /// Metadata store holding the TTL table.
    meta: SqliteRecordStore,
}

impl FileBlobStore {
    /// Creates a blob store rooted at `<data_root>/media`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the media root cannot be created.
    pub fn open(data_root: &Path, meta: SqliteRecordStore) -> Result<Self, StoreError> {
        let media_root = data_root.join("media");
        fs::create_dir_all(&media_root).map_err(|err| StoreError::Io(err.to_string()))?;
        Ok(Self { media_root, meta })
    }

    /// Returns the on-disk path for a media identifier.
    #[must_use]
    pub fn blob_path(&self, id: &MediaId) -> PathBuf {
        self.media_root.join(id.shard()).join(format!("{}.blob", id.as_str()))
    }

    /// Deletes expired media files and forgets their TTL metadata. Returns
    /// the number of swept blobs. Records are never deleted by this pass.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on engine or filesystem failures.
    pub fn sweep_expired(&self, now: Timestamp) -> Result<u64, StoreError> {
        let expired = self.meta.expired_blobs(now).map_err(StoreError::from)?;
        let mut swept = 0_u64;
        let mut forgotten = Vec::new();
        for media_id in &expired {
            let path = self.blob_path(&MediaId::new(media_id.clone()));
            match fs::remove_file(&path) {
                Ok(()) => {
                    swept += 1;
                    forgotten.push(media_id.clone());
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    forgotten.push(media_id.clone());
                }
                Err(err) => return Err(StoreError::Io(err.to_string())),
            }
        }
        self.meta.forget_blobs(&forgotten).map_err(StoreError::from)?;
        Ok(swept)
    }
}

impl BlobStore for FileBlobStore {
    fn put_blob(&self, bytes: &[u8], ttl_expires_at: Timestamp) -> Result<MediaId, StoreError> {
        let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, bytes);
        let media_id = MediaId::from_digest(&digest);
        let path = self.blob_path(&media_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| StoreError::Io(err.to_string()))?;
        }
        if !path.exists() {
            let tmp = path.with_extension("tmp");
            fs::write(&tmp, bytes).map_err(|err| StoreError::Io(err.to_string()))?;
            fs::rename(&tmp, &path).map_err(|err| StoreError::Io(err.to_string()))?;
        }
        self.meta
            .register_blob(media_id.as_str(), bytes.len() as u64, ttl_expires_at, unix_millis())
            .map_err(StoreError::from)?;
        Ok(media_id)
    }

    fn get_blob(&self, id: &MediaId) -> Result<Vec<u8>, StoreError> {
        let ttl = self.meta.blob_ttl(id.as_str()).map_err(StoreError::from)?;
        let Some(ttl) = ttl else {
            return Err(StoreError::Invalid(format!("unknown blob: {id}")));
        };
        if ttl <= unix_millis() {
            return Err(StoreError::TtlExpired(format!("blob {id} expired at {ttl}")));
        }
        let path = self.blob_path(id);
        let bytes = fs::read(&path).map_err(|err| StoreError::Io(err.to_string()))?;
        let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, &bytes);
        if digest.value != id.as_str() {
            return Err(StoreError::Corruption(format!("blob {id} content hash mismatch")));
        }
        Ok(bytes)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the current unix epoch in milliseconds.
fn unix_millis() -> Timestamp {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    Timestamp::from_millis(i64::try_from(now.as_millis()).unwrap_or(i64::MAX))
}
