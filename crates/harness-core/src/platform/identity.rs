//! Device identity used to build backend URLs

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identity of this device and build, as seen by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Human-readable build version
    pub version_name: String,
    /// Monotonic build number
    pub version_code: String,
    /// Stable anonymous device identifier
    pub device_id: String,
}

impl DeviceIdentity {
    /// Create an identity from explicit values
    pub fn new(
        version_name: impl Into<String>,
        version_code: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            version_name: version_name.into(),
            version_code: version_code.into(),
            device_id: device_id.into(),
        }
    }

    /// Create an identity whose device id is the hash of a hardware id
    pub fn from_hardware_id(
        version_name: impl Into<String>,
        version_code: impl Into<String>,
        hardware_id: &str,
    ) -> Self {
        Self::new(version_name, version_code, hash_hex(hardware_id.as_bytes()))
    }

    /// Create an identity keyed on this machine's host name
    pub fn local(version_name: impl Into<String>, version_code: impl Into<String>) -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "harness-default".to_string());
        Self::from_hardware_id(version_name, version_code, &hostname)
    }
}

/// Hex-encoded SHA-256 digest of `bytes`
#[must_use]
pub fn hash_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Append path segments to a base URL, inserting exactly one `/` between parts.
///
/// A `/` inside a segment separates path levels; every other reserved
/// character is percent-encoded.
#[must_use]
pub fn join_url(base: &str, segments: &[&str]) -> String {
    let mut url = base.trim_end_matches('/').to_string();
    for part in segments
        .iter()
        .flat_map(|segment| segment.split('/'))
        .filter(|part| !part.is_empty())
    {
        url.push('/');
        url.push_str(&urlencoding::encode(part));
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hardware_id_is_hashed() {
        let identity = DeviceIdentity::from_hardware_id("1.0", "7", "serial-1234");
        assert_eq!(identity.device_id.len(), 64);
        assert_ne!(identity.device_id, "serial-1234");
        assert_eq!(identity.device_id, hash_hex(b"serial-1234"));
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            hash_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("https://backend.example.org/manifest/", &["1.0", "abc"]),
            "https://backend.example.org/manifest/1.0/abc"
        );
        assert_eq!(
            join_url("https://backend.example.org/upload", &["1.0", "abc", "logs", "/dir/a.log"]),
            "https://backend.example.org/upload/1.0/abc/logs/dir/a.log"
        );
        assert_eq!(join_url("http://h", &["", "x"]), "http://h/x");
    }

    #[test]
    fn test_join_url_encodes_segments() {
        assert_eq!(
            join_url("http://h/upload/", &["1.0", "dev 1", "logs/report #1.log"]),
            "http://h/upload/1.0/dev%201/logs/report%20%231.log"
        );
        assert_eq!(join_url("http://h", &["a?b=c&d"]), "http://h/a%3Fb%3Dc%26d");
        assert_eq!(join_url("http://h", &["caf\u{e9}.txt"]), "http://h/caf%C3%A9.txt");
    }

    #[test]
    fn test_local_identity_is_stable() {
        let first = DeviceIdentity::local("1.0", "1");
        let second = DeviceIdentity::local("1.0", "1");
        assert_eq!(first, second);
    }
}
