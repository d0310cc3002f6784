use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use chrono::{DateTime, Utc};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::config::LocationConfig;
use crate::error::{CacheError, CacheResult};
use crate::utils;

/// Magic prefix of a sealed segment file
const SEGMENT_MAGIC: &[u8; 4] = b"RPSG";
/// Magic prefix of a sealed manifest file
const MANIFEST_MAGIC: &[u8; 4] = b"RPMF";
/// On-disk format version
const FORMAT_VERSION: u8 = 1;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = 4 + 1 + SALT_LEN + NONCE_LEN;

const MANIFEST_FILE: &str = "pool.manifest";
const SEGMENT_EXT: &str = "seg";
const REKEY_EXT: &str = "seg.rekey";

const SEGMENT_KEY_INFO: &[u8] = b"randpool.segment.v1";
const MANIFEST_KEY_INFO: &[u8] = b"randpool.manifest.v1";

/// Metadata for one sealed pool segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMeta {
    /// Unique segment identifier (UUID v4), also the file stem
    pub id: String,
    /// Location holding the segment file
    pub location_id: String,
    /// Total plaintext length in bytes
    pub len: u64,
    /// Bytes already handed out; never rewinds
    pub consumed: u64,
    /// Hex-encoded SHA-256 of the segment plaintext
    pub checksum: String,
    /// Creation time, used for oldest-first consumption and TTL checks
    pub created_at: DateTime<Utc>,
}

impl SegmentMeta {
    /// Unconsumed plaintext bytes remaining in this segment.
    pub fn remaining(&self) -> u64 {
        self.len.saturating_sub(self.consumed)
    }
}

/// Result of advancing a segment's consumption offset
#[derive(Debug, Clone)]
pub struct SegmentUpdate {
    pub location_id: String,
    pub len: u64,
    /// True when the segment became fully consumed and was deleted
    pub removed: bool,
}

/// Per-location manifest, sealed at rest under the device secret
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    version: u8,
    /// One-way attained-readiness flag, persisted across restarts
    ready_attained: bool,
    /// Monotonic counter of bytes ever fetched from the entropy source
    total_downloaded: u64,
    segments: Vec<SegmentMeta>,
}

impl Manifest {
    fn empty() -> Self {
        Self {
            version: FORMAT_VERSION,
            ready_attained: false,
            total_downloaded: 0,
            segments: Vec::new(),
        }
    }
}

/// Encrypted on-disk store for the random pool
///
/// All mutation goes through the cache engine's lock; the store itself is
/// not internally synchronized.
#[derive(Debug)]
pub struct SecretStore {
    secret: Zeroizing<Vec<u8>>,
    locations: Vec<LocationConfig>,
    manifests: HashMap<String, Manifest>,
    ready_attained: bool,
    total_downloaded: u64,
}

impl SecretStore {
    /// Open (or create) the store at the configured locations.
    ///
    /// Creates location directories as needed and unseals any existing
    /// manifests. A manifest that fails authentication means the supplied
    /// secret is wrong and maps to `DeviceSecretFailed`.
    pub fn open(locations: Vec<LocationConfig>, secret: &[u8]) -> CacheResult<Self> {
        if secret.is_empty() {
            return Err(CacheError::invalid_argument("device secret must not be empty"));
        }

        let mut manifests = HashMap::new();
        let mut ready_attained = false;
        let mut total_downloaded = 0u64;

        for location in &locations {
            fs::create_dir_all(&location.path).map_err(|e| {
                CacheError::system(format!(
                    "cannot create location '{}' at {}: {}",
                    location.id,
                    location.path.display(),
                    e
                ))
            })?;

            clean_stale_files(&location.path)?;

            let manifest_path = location.path.join(MANIFEST_FILE);
            let manifest = if manifest_path.exists() {
                let sealed = fs::read(&manifest_path)?;
                let plaintext = unseal(
                    &sealed,
                    secret,
                    MANIFEST_MAGIC,
                    MANIFEST_KEY_INFO,
                    location.id.as_bytes(),
                    || {
                        CacheError::device_secret(
                            "manifest authentication failed, wrong device secret",
                        )
                    },
                )?;
                serde_json::from_slice::<Manifest>(&plaintext)?
            } else {
                Manifest::empty()
            };

            ready_attained |= manifest.ready_attained;
            total_downloaded = total_downloaded.max(manifest.total_downloaded);
            manifests.insert(location.id.clone(), manifest);
        }

        Ok(Self {
            secret: Zeroizing::new(secret.to_vec()),
            locations,
            manifests,
            ready_attained,
            total_downloaded,
        })
    }

    /// All segment metadata across locations, oldest first.
    pub fn segments(&self) -> Vec<SegmentMeta> {
        let mut all: Vec<SegmentMeta> = self
            .manifests
            .values()
            .flat_map(|m| m.segments.iter().cloned())
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }

    /// Bytes stored per location, for seeding quota accounting.
    pub fn capacity_usage(&self) -> Vec<(String, u64)> {
        self.manifests
            .iter()
            .map(|(id, m)| (id.clone(), m.segments.iter().map(|s| s.len).sum()))
            .collect()
    }

    pub fn ready_attained(&self) -> bool {
        self.ready_attained
    }

    pub fn total_downloaded(&self) -> u64 {
        self.total_downloaded
    }

    /// Record that the pool reached the minimum watermark. Persisted into
    /// every location manifest so it survives restarts.
    pub fn mark_ready_attained(&mut self) -> CacheResult<()> {
        if self.ready_attained {
            return Ok(());
        }
        self.ready_attained = true;
        for location in self.locations.clone() {
            self.persist_manifest(&location)?;
        }
        Ok(())
    }

    /// Count of locations whose directory currently exists and is writable.
    pub fn usable_locations(&self) -> usize {
        self.locations
            .iter()
            .filter(|l| match fs::metadata(&l.path) {
                Ok(meta) => meta.is_dir() && !meta.permissions().readonly(),
                Err(_) => false,
            })
            .count()
    }

    /// Seal `bytes` into a new segment file at `location_id` and record it
    /// in that location's manifest. Bumps the download counter.
    pub fn write_segment(&mut self, location_id: &str, bytes: &[u8]) -> CacheResult<SegmentMeta> {
        if bytes.is_empty() {
            return Err(CacheError::invalid_argument("segment must not be empty"));
        }
        let location = self.location(location_id)?.clone();

        let id = uuid::Uuid::new_v4().to_string();
        let checksum = hex::encode(Sha256::digest(bytes));
        let meta = SegmentMeta {
            id: id.clone(),
            location_id: location_id.to_string(),
            len: bytes.len() as u64,
            consumed: 0,
            checksum,
            created_at: Utc::now(),
        };

        let sealed = seal(
            bytes,
            &self.secret,
            SEGMENT_MAGIC,
            SEGMENT_KEY_INFO,
            id.as_bytes(),
        )?;
        let path = segment_path(&location.path, &id);
        write_file(&path, &sealed)?;

        self.total_downloaded += bytes.len() as u64;
        self.manifests
            .get_mut(location_id)
            .ok_or_else(|| CacheError::system(format!("no manifest for location '{}'", location_id)))?
            .segments
            .push(meta.clone());
        self.persist_manifest(&location)?;

        Ok(meta)
    }

    /// Unseal a segment and verify its checksum.
    ///
    /// Authentication failure maps to `DeviceSecretFailed`; a checksum
    /// mismatch of the decrypted plaintext maps to `DataCorrupted` and the
    /// bytes are never returned.
    pub fn read_segment(&self, meta: &SegmentMeta) -> CacheResult<Zeroizing<Vec<u8>>> {
        let location = self.location(&meta.location_id)?;
        let path = segment_path(&location.path, &meta.id);
        let sealed = fs::read(&path).map_err(|e| {
            CacheError::system(format!("cannot read segment '{}': {}", meta.id, e))
        })?;

        let plaintext = unseal(
            &sealed,
            &self.secret,
            SEGMENT_MAGIC,
            SEGMENT_KEY_INFO,
            meta.id.as_bytes(),
            || {
                CacheError::corrupted(format!(
                    "segment '{}' failed authentication, file damaged",
                    meta.id
                ))
            },
        )?;

        if plaintext.len() as u64 != meta.len {
            return Err(CacheError::corrupted(format!(
                "segment '{}' has length {} but manifest records {}",
                meta.id,
                plaintext.len(),
                meta.len
            )));
        }
        let checksum = hex::encode(Sha256::digest(&plaintext[..]));
        if checksum != meta.checksum {
            return Err(CacheError::corrupted(format!(
                "segment '{}' failed checksum verification",
                meta.id
            )));
        }

        Ok(plaintext)
    }

    /// Advance a segment's consumption offset by `n` bytes and persist the
    /// manifest before returning. A fully consumed segment is deleted.
    pub fn advance_consumed(&mut self, segment_id: &str, n: u64) -> CacheResult<SegmentUpdate> {
        let (location_id, removed, len) = {
            let (location_id, segment) = self
                .manifests
                .iter_mut()
                .find_map(|(loc, m)| {
                    m.segments
                        .iter_mut()
                        .find(|s| s.id == segment_id)
                        .map(|s| (loc.clone(), s))
                })
                .ok_or_else(|| {
                    CacheError::system(format!("unknown segment '{}'", segment_id))
                })?;

            if segment.consumed + n > segment.len {
                return Err(CacheError::system(format!(
                    "consumption offset for segment '{}' would exceed its length",
                    segment_id
                )));
            }
            segment.consumed += n;
            (location_id, segment.consumed == segment.len, segment.len)
        };
        let location = self.location(&location_id)?.clone();

        if removed {
            let path = segment_path(&location.path, segment_id);
            // The offset stays advanced even if the unlink fails
            if let Err(e) = fs::remove_file(&path) {
                log::warn!("failed to delete consumed segment '{}': {}", segment_id, e);
            }
            if let Some(manifest) = self.manifests.get_mut(&location.id) {
                manifest.segments.retain(|s| s.id != segment_id);
            }
        }
        self.persist_manifest(&location)?;

        Ok(SegmentUpdate {
            location_id: location.id,
            len,
            removed,
        })
    }

    /// Delete a segment file and its manifest entry regardless of offset.
    pub fn remove_segment(&mut self, segment_id: &str) -> CacheResult<SegmentUpdate> {
        let location = {
            let location_id = self
                .manifests
                .iter()
                .find(|(_, m)| m.segments.iter().any(|s| s.id == segment_id))
                .map(|(loc, _)| loc.clone())
                .ok_or_else(|| {
                    CacheError::system(format!("unknown segment '{}'", segment_id))
                })?;
            self.location(&location_id)?.clone()
        };

        let len = self
            .manifests
            .get(&location.id)
            .and_then(|m| m.segments.iter().find(|s| s.id == segment_id))
            .map(|s| s.len)
            .unwrap_or(0);

        let path = segment_path(&location.path, segment_id);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        if let Some(manifest) = self.manifests.get_mut(&location.id) {
            manifest.segments.retain(|s| s.id != segment_id);
        }
        self.persist_manifest(&location)?;

        Ok(SegmentUpdate {
            location_id: location.id,
            len,
            removed: true,
        })
    }

    /// Re-encrypt every segment and manifest under a new device secret.
    ///
    /// The caller-supplied current secret is checked in constant time. All
    /// shadow files are written before any original is replaced, so a
    /// failure before the rename phase leaves the store fully readable
    /// under the old secret. Each individual replacement is an atomic
    /// rename: a crash mid-rekey leaves every file entirely old or
    /// entirely new, never mixed.
    pub fn rekey(&mut self, old_secret: &[u8], new_secret: &[u8]) -> CacheResult<()> {
        if !utils::constant_time_eq(old_secret, &self.secret) {
            return Err(CacheError::device_secret(
                "current device secret does not match",
            ));
        }
        if new_secret.is_empty() {
            return Err(CacheError::invalid_argument(
                "new device secret must not be empty",
            ));
        }

        let segments = self.segments();
        let mut shadows: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(segments.len());

        // Phase one: write every shadow; delete them all on any failure.
        for meta in &segments {
            let result = (|| -> CacheResult<(PathBuf, PathBuf)> {
                let plaintext = self.read_segment(meta)?;
                let sealed = seal(
                    &plaintext,
                    new_secret,
                    SEGMENT_MAGIC,
                    SEGMENT_KEY_INFO,
                    meta.id.as_bytes(),
                )?;
                let location = self.location(&meta.location_id)?;
                let shadow = location.path.join(format!("{}.{}", meta.id, REKEY_EXT));
                write_file(&shadow, &sealed)?;
                Ok((shadow, segment_path(&location.path, &meta.id)))
            })();

            match result {
                Ok(pair) => shadows.push(pair),
                Err(e) => {
                    for (shadow, _) in &shadows {
                        let _ = fs::remove_file(shadow);
                    }
                    return Err(CacheError::device_secret(format!(
                        "rekey aborted, pool unchanged: {}",
                        e
                    )));
                }
            }
        }

        // Phase two: atomic renames, then manifests under the new secret.
        // Both secrets are still in hand here, so a rename failure rolls
        // the already replaced files back under the old one.
        for (index, (shadow, target)) in shadows.iter().enumerate() {
            if let Err(rename_err) = fs::rename(shadow, target) {
                self.roll_back_renames(&segments, &shadows, index, new_secret);
                return Err(CacheError::device_secret(format!(
                    "rekey failed while replacing sealed files, pool kept under the previous secret: {}",
                    rename_err
                )));
            }
        }
        self.secret = Zeroizing::new(new_secret.to_vec());
        for location in self.locations.clone() {
            self.persist_manifest(&location)?;
        }
        Ok(())
    }

    /// Best-effort recovery when a phase-two rename fails at `renamed`:
    /// files before it hold the new secret and are re-sealed under the old
    /// one, files from it on still hold the old secret and only need their
    /// shadows removed.
    fn roll_back_renames(
        &self,
        segments: &[SegmentMeta],
        shadows: &[(PathBuf, PathBuf)],
        renamed: usize,
        new_secret: &[u8],
    ) {
        for (index, (shadow, target)) in shadows.iter().enumerate() {
            if index >= renamed {
                let _ = fs::remove_file(shadow);
                continue;
            }
            let meta = &segments[index];
            let restored = fs::read(target)
                .map_err(CacheError::from)
                .and_then(|sealed| {
                    unseal(
                        &sealed,
                        new_secret,
                        SEGMENT_MAGIC,
                        SEGMENT_KEY_INFO,
                        meta.id.as_bytes(),
                        || CacheError::corrupted("rekeyed segment failed authentication"),
                    )
                })
                .and_then(|plaintext| {
                    seal(
                        &plaintext,
                        &self.secret,
                        SEGMENT_MAGIC,
                        SEGMENT_KEY_INFO,
                        meta.id.as_bytes(),
                    )
                })
                .and_then(|sealed| write_file(target, &sealed));
            if let Err(e) = restored {
                log::error!(
                    "could not restore segment '{}' under the previous secret: {}",
                    meta.id,
                    e
                );
            }
        }
    }

    /// Delete all segment files and metadata at every configured location.
    /// Idempotent; resets the attained-readiness flag and download counter.
    pub fn wipe(&mut self) -> CacheResult<()> {
        for location in &self.locations {
            if !location.path.exists() {
                continue;
            }
            for entry in fs::read_dir(&location.path)? {
                let entry = entry?;
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name == MANIFEST_FILE
                    || name.ends_with(&format!(".{}", SEGMENT_EXT))
                    || name.ends_with(&format!(".{}", REKEY_EXT))
                {
                    fs::remove_file(entry.path())?;
                }
            }
        }
        for manifest in self.manifests.values_mut() {
            *manifest = Manifest::empty();
        }
        self.ready_attained = false;
        self.total_downloaded = 0;
        Ok(())
    }

    fn location(&self, id: &str) -> CacheResult<&LocationConfig> {
        self.locations
            .iter()
            .find(|l| l.id == id)
            .ok_or_else(|| CacheError::invalid_argument(format!("unknown location '{}'", id)))
    }

    /// Seal and write one location's manifest via a shadow file + rename.
    fn persist_manifest(&mut self, location: &LocationConfig) -> CacheResult<()> {
        let manifest = self
            .manifests
            .get_mut(&location.id)
            .ok_or_else(|| CacheError::system(format!("no manifest for location '{}'", location.id)))?;
        manifest.ready_attained = self.ready_attained;
        manifest.total_downloaded = self.total_downloaded;

        let plaintext = serde_json::to_vec(manifest)?;
        let sealed = seal(
            &plaintext,
            &self.secret,
            MANIFEST_MAGIC,
            MANIFEST_KEY_INFO,
            location.id.as_bytes(),
        )?;

        let target = location.path.join(MANIFEST_FILE);
        let shadow = location.path.join(format!("{}.tmp", MANIFEST_FILE));
        write_file(&shadow, &sealed)?;
        fs::rename(&shadow, &target)?;
        Ok(())
    }
}

fn segment_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{}.{}", id, SEGMENT_EXT))
}

/// Remove shadow and temp files left behind by an interrupted rekey or
/// manifest write. The manifests still authenticate under the current
/// secret at this point, so the leftovers are stale by definition.
fn clean_stale_files(dir: &Path) -> CacheResult<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.ends_with(&format!(".{}", REKEY_EXT))
            || name == format!("{}.tmp", MANIFEST_FILE)
        {
            log::warn!("removing stale file '{}' from an interrupted write", name);
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

fn write_file(path: &Path, bytes: &[u8]) -> CacheResult<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(())
}

/// Derive the per-file AES-256 key from the device secret and header salt.
fn derive_file_key(secret: &[u8], salt: &[u8], info: &[u8]) -> CacheResult<Zeroizing<[u8; 32]>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), secret);
    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand(info, key.as_mut())
        .map_err(|e| CacheError::system(format!("key derivation failed: {}", e)))?;
    Ok(key)
}

/// Seal plaintext into `magic | version | salt | nonce | ciphertext+tag`.
fn seal(
    plaintext: &[u8],
    secret: &[u8],
    magic: &[u8; 4],
    info: &[u8],
    aad: &[u8],
) -> CacheResult<Vec<u8>> {
    let salt = utils::random_bytes(SALT_LEN)?;
    let nonce_bytes = utils::random_bytes(NONCE_LEN)?;

    let key = derive_file_key(secret, &salt, info)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_ref()));
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|e| CacheError::system(format!("sealing failed: {}", e)))?;

    let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    out.extend_from_slice(magic);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Reverse of [`seal`]. Header damage maps to `DataCorrupted`; a GCM tag
/// failure is reported through `auth_failure`, because its meaning depends
/// on the file: for a manifest it is the secret check (`DeviceSecretFailed`),
/// while a segment was already gated by the manifest so a bad tag means the
/// file itself is damaged (`DataCorrupted`).
fn unseal(
    sealed: &[u8],
    secret: &[u8],
    magic: &[u8; 4],
    info: &[u8],
    aad: &[u8],
    auth_failure: impl FnOnce() -> CacheError,
) -> CacheResult<Zeroizing<Vec<u8>>> {
    if sealed.len() < HEADER_LEN {
        return Err(CacheError::corrupted("sealed file shorter than its header"));
    }
    if &sealed[..4] != magic {
        return Err(CacheError::corrupted("sealed file has an unknown magic"));
    }
    if sealed[4] != FORMAT_VERSION {
        return Err(CacheError::corrupted(format!(
            "unsupported on-disk format version {}",
            sealed[4]
        )));
    }

    let salt = &sealed[5..5 + SALT_LEN];
    let nonce = Nonce::from_slice(&sealed[5 + SALT_LEN..HEADER_LEN]);
    let ciphertext = &sealed[HEADER_LEN..];

    let key = derive_file_key(secret, salt, info)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_ref()));

    let plaintext = cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad })
        .map_err(|_| auth_failure())?;
    Ok(Zeroizing::new(plaintext))
}
