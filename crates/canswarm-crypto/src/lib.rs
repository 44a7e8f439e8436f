pub mod canonical;
pub mod envelope;
pub mod hash;
pub mod keypair;

pub use canonical::to_canonical_json;
pub use envelope::{build_envelope, verify_envelope, EnvelopeMeta};
pub use hash::{agent_id_from_pubkey, artifact_hash, sha256};
pub use keypair::{verify_signature, KeyPair};
