//! Append-only signed audit log.
//!
//! One JSONL file per protocol thread, one record per BUS.PUBLISH and
//! BUS.DELIVER event. File position is the total order per thread; replay
//! iterates records in file order. The log is the replay oracle — it is the
//! only input the replay verifier accepts.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::debug;

use canswarm_core::envelope::{Envelope, Verb};
use canswarm_core::error::SwarmError;
use canswarm_core::types::{PayloadHash, PublicKey, Signature, ThreadId};
use canswarm_crypto::{sha256, to_canonical_json, verify_signature, KeyPair};

// ── Records ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditDirection {
    Publish,
    Deliver,
}

/// The signed portion of an audit record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditBody {
    pub direction: AuditDirection,
    /// Wall time in nanoseconds at append.
    pub wall_ns: i64,
    pub thread: ThreadId,
    pub subject: String,
    pub kind: Verb,
    pub envelope: Envelope,
    pub payload_hash: PayloadHash,
}

/// One audit log line: body plus the local node's signature over
/// SHA-256(canonical body).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub body: AuditBody,
    pub node_key: PublicKey,
    pub signature: Signature,
}

impl AuditRecord {
    /// Check the record signature. Does not re-verify the inner envelope.
    pub fn verify(&self) -> Result<(), SwarmError> {
        let bytes = to_canonical_json(&self.body)?;
        let digest = sha256(&bytes);
        if verify_signature(&self.node_key, &digest, &self.signature) {
            Ok(())
        } else {
            Err(SwarmError::SignatureInvalid)
        }
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

/// Append-only writer. Keeps one open handle per thread; every append is
/// flushed before returning so the log never trails the state it explains.
pub struct AuditLog {
    dir: PathBuf,
    node_key: Arc<KeyPair>,
    files: Mutex<HashMap<ThreadId, File>>,
}

impl AuditLog {
    pub fn open<P: AsRef<Path>>(dir: P, node_key: Arc<KeyPair>) -> Result<Self, SwarmError> {
        std::fs::create_dir_all(dir.as_ref()).map_err(|e| SwarmError::Storage(e.to_string()))?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            node_key,
            files: Mutex::new(HashMap::new()),
        })
    }

    pub fn record_publish(&self, subject: &str, envelope: &Envelope) -> Result<(), SwarmError> {
        self.append(AuditDirection::Publish, subject, envelope)
    }

    pub fn record_deliver(&self, subject: &str, envelope: &Envelope) -> Result<(), SwarmError> {
        self.append(AuditDirection::Deliver, subject, envelope)
    }

    fn append(
        &self,
        direction: AuditDirection,
        subject: &str,
        envelope: &Envelope,
    ) -> Result<(), SwarmError> {
        let body = AuditBody {
            direction,
            wall_ns: chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX),
            thread: envelope.thread,
            subject: subject.to_string(),
            kind: envelope.kind,
            envelope: envelope.clone(),
            payload_hash: envelope.payload_hash,
        };
        let digest = sha256(&to_canonical_json(&body)?);
        let record = AuditRecord {
            node_key: self.node_key.public_key,
            signature: self.node_key.sign(&digest),
            body,
        };

        let line =
            serde_json::to_string(&record).map_err(|e| SwarmError::Serialization(e.to_string()))?;

        let mut files = self.files.lock().expect("audit file map poisoned");
        let file = match files.entry(envelope.thread) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                let path = thread_log_path(&self.dir, &envelope.thread);
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .map_err(|e| SwarmError::Storage(e.to_string()))?;
                e.insert(file)
            }
        };
        writeln!(file, "{line}").map_err(|e| SwarmError::Storage(e.to_string()))?;
        file.flush().map_err(|e| SwarmError::Storage(e.to_string()))?;
        debug!(thread = %envelope.thread, id = %envelope.id, ?direction, "audit append");
        Ok(())
    }
}

fn thread_log_path(dir: &Path, thread: &ThreadId) -> PathBuf {
    dir.join(format!("{}.log", thread.to_hex()))
}

// ── Reader ───────────────────────────────────────────────────────────────────

/// Read-side view over an audit directory.
pub struct AuditReader {
    dir: PathBuf,
}

impl AuditReader {
    pub fn open<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// All threads with a log file, in file-name order.
    pub fn threads(&self) -> Result<Vec<ThreadId>, SwarmError> {
        let mut out = Vec::new();
        let entries =
            std::fs::read_dir(&self.dir).map_err(|e| SwarmError::Storage(e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| SwarmError::Storage(e.to_string()))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(hex) = name.strip_suffix(".log") {
                if let Ok(thread) = ThreadId::from_hex(hex) {
                    out.push(thread);
                }
            }
        }
        out.sort();
        Ok(out)
    }

    /// All records for a thread, in file order.
    pub fn thread_records(&self, thread: &ThreadId) -> Result<Vec<AuditRecord>, SwarmError> {
        let path = thread_log_path(&self.dir, thread);
        let file = File::open(&path).map_err(|e| SwarmError::Storage(e.to_string()))?;
        let mut out = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| SwarmError::Storage(e.to_string()))?;
            if line.is_empty() {
                continue;
            }
            let record: AuditRecord =
                serde_json::from_str(&line).map_err(|e| SwarmError::Serialization(e.to_string()))?;
            out.push(record);
        }
        Ok(out)
    }

    /// Verify every record signature in a thread's log.
    pub fn verify_thread(&self, thread: &ThreadId) -> Result<usize, SwarmError> {
        let records = self.thread_records(thread)?;
        for record in &records {
            record.verify()?;
        }
        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canswarm_core::envelope::{HeartbeatPayload, Payload};
    use canswarm_core::types::{CapsuleHash, LeaseId, TaskId};
    use canswarm_crypto::{build_envelope, EnvelopeMeta};

    fn test_envelope(kp: &KeyPair, lamport: u64) -> Envelope {
        build_envelope(
            Payload::Heartbeat(HeartbeatPayload {
                task: TaskId::from_bytes([1; 32]),
                lease: LeaseId::from_bytes([2; 32]),
            }),
            EnvelopeMeta {
                thread: ThreadId::from_bytes([7; 32]),
                lamport,
                ts: 1_700_000_000,
                capsule: CapsuleHash::from_bytes([0; 32]),
                epoch: 0,
                nonce: lamport,
            },
            kp,
        )
        .unwrap()
    }

    fn audit_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("canswarm_audit_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn append_then_read_back_in_order() {
        let dir = audit_dir("order");
        let kp = Arc::new(KeyPair::from_seed([1; 32]));
        let log = AuditLog::open(&dir, Arc::clone(&kp)).unwrap();

        let e1 = test_envelope(&kp, 1);
        let e2 = test_envelope(&kp, 2);
        log.record_publish("thread.x.heartbeat", &e1).unwrap();
        log.record_deliver("thread.x.heartbeat", &e1).unwrap();
        log.record_publish("thread.x.heartbeat", &e2).unwrap();

        let reader = AuditReader::open(&dir);
        let records = reader.thread_records(&e1.thread).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].body.direction, AuditDirection::Publish);
        assert_eq!(records[1].body.direction, AuditDirection::Deliver);
        assert_eq!(records[2].body.envelope.lamport, 2);
    }

    #[test]
    fn record_signatures_verify() {
        let dir = audit_dir("verify");
        let kp = Arc::new(KeyPair::from_seed([2; 32]));
        let log = AuditLog::open(&dir, Arc::clone(&kp)).unwrap();
        let env = test_envelope(&kp, 3);
        log.record_publish("thread.x.heartbeat", &env).unwrap();

        let reader = AuditReader::open(&dir);
        assert_eq!(reader.verify_thread(&env.thread).unwrap(), 1);
    }

    #[test]
    fn tampered_record_fails_verification() {
        let dir = audit_dir("tamper");
        let kp = Arc::new(KeyPair::from_seed([3; 32]));
        let log = AuditLog::open(&dir, Arc::clone(&kp)).unwrap();
        let env = test_envelope(&kp, 4);
        log.record_publish("thread.x.heartbeat", &env).unwrap();

        let reader = AuditReader::open(&dir);
        let mut record = reader.thread_records(&env.thread).unwrap().remove(0);
        record.body.subject = "thread.x.forged".into();
        assert!(record.verify().is_err());
    }
}
