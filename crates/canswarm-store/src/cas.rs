//! Content-addressed artifact store.
//!
//! Blobs are keyed by SHA-256 (lowercase hex) and sharded into directories
//! by the first two hex characters, e.g. `ab/abcdef…`. Puts are idempotent;
//! nothing is mutated or deleted during a thread's life. The CAS is the
//! artifact-handoff channel between COMMIT (worker writes) and ATTEST
//! (verifiers read) — envelopes only ever carry the hash.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use canswarm_core::constants::{CAS_BREAKER_FAILURE_THRESHOLD, CAS_BREAKER_OPEN_SECS};
use canswarm_core::error::SwarmError;
use canswarm_core::types::ArtifactHash;

use crate::db::SwarmDb;

/// File-backed CAS with a circuit breaker on backend failures.
///
/// After 3 consecutive I/O failures the circuit opens for 60 s and all
/// operations fail fast with `CasBackendUnavailable`. A miss (`CasMissing`)
/// is not a backend failure and does not trip the breaker.
pub struct Cas {
    root: PathBuf,
    consecutive_failures: AtomicU32,
    open_until: Mutex<Option<Instant>>,
}

impl Cas {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, SwarmError> {
        fs::create_dir_all(root.as_ref()).map_err(|e| SwarmError::Storage(e.to_string()))?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
            consecutive_failures: AtomicU32::new(0),
            open_until: Mutex::new(None),
        })
    }

    fn blob_path(&self, hash: &ArtifactHash) -> PathBuf {
        let hex = hash.to_hex();
        self.root.join(&hex[..2]).join(hex)
    }

    fn check_breaker(&self) -> Result<(), SwarmError> {
        let mut open_until = self.open_until.lock().expect("breaker lock poisoned");
        if let Some(until) = *open_until {
            if Instant::now() < until {
                return Err(SwarmError::CasBackendUnavailable);
            }
            // Half-open: allow the next operation to probe the backend.
            *open_until = None;
        }
        Ok(())
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= CAS_BREAKER_FAILURE_THRESHOLD {
            warn!(failures, "CAS circuit breaker opened");
            *self.open_until.lock().expect("breaker lock poisoned") =
                Some(Instant::now() + Duration::from_secs(CAS_BREAKER_OPEN_SECS));
            self.consecutive_failures.store(0, Ordering::SeqCst);
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    /// Store a blob. Idempotent: same bytes → same hash → no-op.
    pub fn put(&self, bytes: &[u8]) -> Result<ArtifactHash, SwarmError> {
        self.check_breaker()?;
        let hash = canswarm_crypto::artifact_hash(bytes);
        let path = self.blob_path(&hash);
        if path.exists() {
            return Ok(hash);
        }

        let result = (|| -> std::io::Result<()> {
            let dir = path.parent().expect("blob path has a shard dir");
            fs::create_dir_all(dir)?;
            // Write-then-rename so a crash never leaves a partial blob
            // addressable under its hash.
            let tmp = dir.join(format!(".tmp-{}", std::process::id()));
            fs::write(&tmp, bytes)?;
            fs::rename(&tmp, &path)?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                self.record_success();
                debug!(hash = %hash, size = bytes.len(), "CAS put");
                Ok(hash)
            }
            Err(e) => {
                self.record_failure();
                Err(SwarmError::Storage(e.to_string()))
            }
        }
    }

    /// Fetch a blob by hash.
    pub fn get(&self, hash: &ArtifactHash) -> Result<Vec<u8>, SwarmError> {
        self.check_breaker()?;
        let path = self.blob_path(hash);
        match fs::read(&path) {
            Ok(bytes) => {
                self.record_success();
                Ok(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.record_success();
                Err(SwarmError::CasMissing(hash.to_hex()))
            }
            Err(e) => {
                self.record_failure();
                Err(SwarmError::Storage(e.to_string()))
            }
        }
    }

    pub fn exists(&self, hash: &ArtifactHash) -> bool {
        self.blob_path(hash).exists()
    }

    /// Pin a hash so housekeeping never evicts it. Pins live in the db so
    /// they survive restarts.
    pub fn pin(&self, db: &SwarmDb, hash: &ArtifactHash) -> Result<(), SwarmError> {
        db.put_meta(&format!("cas_pin/{}", hash.to_hex()), &[])
    }

    pub fn is_pinned(&self, db: &SwarmDb, hash: &ArtifactHash) -> Result<bool, SwarmError> {
        Ok(db.get_meta(&format!("cas_pin/{}", hash.to_hex()))?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_cas(name: &str) -> Cas {
        let dir = std::env::temp_dir().join(format!("canswarm_cas_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        Cas::open(&dir).unwrap()
    }

    #[test]
    fn put_get_round_trip() {
        let cas = open_cas("round_trip");
        let hash = cas.put(b"artifact body").unwrap();
        assert_eq!(cas.get(&hash).unwrap(), b"artifact body");
        assert!(cas.exists(&hash));
    }

    #[test]
    fn put_is_idempotent() {
        let cas = open_cas("idem");
        let a = cas.put(b"same bytes").unwrap();
        let b = cas.put(b"same bytes").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_hash_is_a_miss_not_a_failure() {
        let cas = open_cas("miss");
        let absent = ArtifactHash::from_bytes([0xee; 32]);
        for _ in 0..5 {
            assert!(matches!(cas.get(&absent), Err(SwarmError::CasMissing(_))));
        }
        // Breaker did not trip: a put still goes through.
        assert!(cas.put(b"x").is_ok());
    }

    #[test]
    fn blobs_are_sharded_by_prefix() {
        let cas = open_cas("shard");
        let hash = cas.put(b"sharded").unwrap();
        let hex = hash.to_hex();
        assert!(cas.root.join(&hex[..2]).join(&hex).exists());
    }
}
