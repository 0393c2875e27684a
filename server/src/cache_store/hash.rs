//! Hashing and naming utilities for cache generations

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// File extension for generation files
pub const GENERATION_EXT: &str = "swc";

/// Compute the hex SHA-256 of data
pub fn sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// File name for a generation: base64url of its name, so any tag is filesystem-safe
/// and the name can be recovered from a directory listing
pub fn generation_file_name(name: &str) -> String {
    format!("{}.{}", URL_SAFE_NO_PAD.encode(name.as_bytes()), GENERATION_EXT)
}

/// Recover a generation name from a file name produced by [`generation_file_name`]
pub fn generation_name_from_file(file_name: &str) -> Option<String> {
    let stem = file_name.strip_suffix(GENERATION_EXT)?.strip_suffix('.')?;
    let bytes = URL_SAFE_NO_PAD.decode(stem).ok()?;
    String::from_utf8(bytes).ok()
}

/// Random suffix for temporary files so concurrent writers never share one
pub fn temp_suffix() -> String {
    let mut bytes = [0u8; 12];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256() {
        let hash = sha256(b"test data");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, sha256(b"test data"));
    }

    #[test]
    fn test_generation_file_name() {
        let file = generation_file_name("Strapre-v1");
        assert!(file.ends_with(".swc"));
        assert!(!file.contains('/'));
        assert_eq!(generation_name_from_file(&file).as_deref(), Some("Strapre-v1"));
    }

    #[test]
    fn test_generation_name_with_path_chars() {
        let file = generation_file_name("../shell/v2");
        assert!(!file.contains('/'));
        assert_eq!(generation_name_from_file(&file).as_deref(), Some("../shell/v2"));
    }

    #[test]
    fn test_foreign_files_ignored() {
        assert_eq!(generation_name_from_file("notes.txt"), None);
        assert_eq!(generation_name_from_file("%%%.swc"), None);
    }

    #[test]
    fn test_temp_suffix() {
        let a = temp_suffix();
        let b = temp_suffix();
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }
}
