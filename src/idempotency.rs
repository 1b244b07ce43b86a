use sha2::{Digest, Sha256};

/// Natural key for a committed row: the entity plus its timestamp in UTC
/// RFC 3339 form. Retried batches upsert onto the same keys.
pub fn compute_record_key(entity: &str, observed_at_rfc3339: &str) -> String {
    let mut s = String::with_capacity(entity.len() + observed_at_rfc3339.len() + 1);
    s.push_str(entity);
    s.push('|');
    s.push_str(observed_at_rfc3339);

    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    let out = hasher.finalize();
    hex::encode(out)
}
