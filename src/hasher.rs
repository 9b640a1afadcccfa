use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

const READ_BUFFER_BYTES: usize = 1024 * 1024;

/// Length of the hash prefix used in collision suffixes.
pub const SHORT_HASH_LEN: usize = 8;

/// Stream `path` through SHA-256 and return the lowercase hex digest.
///
/// Memory use is bounded by the read buffer regardless of file size; the
/// digest depends only on the bytes, never on name, location or mtime.
pub fn hash_file(path: &Path) -> Result<String, std::io::Error> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER_BYTES];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    let result = hasher.finalize();
    Ok(result.iter().map(|byte| format!("{:02x}", byte)).collect())
}

pub fn short_hash(hash: &str) -> &str {
    let end = hash
        .char_indices()
        .nth(SHORT_HASH_LEN)
        .map(|(index, _)| index)
        .unwrap_or(hash.len());
    &hash[..end]
}
