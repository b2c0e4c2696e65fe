//! On-disk manifest cache
//!
//! `server.json` holds the last downloaded manifest, `client.json` the
//! outbound status document and `new.json` the download in progress.

use harness_core::hash_hex;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::Result;

/// Last downloaded manifest
pub const SERVER_FILE: &str = "server.json";
/// Outbound status document
pub const CLIENT_FILE: &str = "client.json";
/// Download scratch file
pub const SCRATCH_FILE: &str = "new.json";

/// Paths of the cached documents
#[derive(Debug, Clone)]
pub struct ManifestFiles {
    server: PathBuf,
    client: PathBuf,
    scratch: PathBuf,
}

impl ManifestFiles {
    /// Cache rooted at `dir`
    pub fn new(dir: &Path) -> Self {
        Self {
            server: dir.join(SERVER_FILE),
            client: dir.join(CLIENT_FILE),
            scratch: dir.join(SCRATCH_FILE),
        }
    }

    /// Path of the cached manifest
    pub fn server_path(&self) -> &Path {
        &self.server
    }

    /// Path of the outbound status document
    pub fn client_path(&self) -> &Path {
        &self.client
    }

    /// Hash of the cached manifest, if one exists
    pub async fn server_hash(&self) -> Result<Option<String>> {
        match tokio::fs::read(&self.server).await {
            Ok(bytes) => Ok(Some(hash_hex(&bytes))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Outbound status document, if one exists and is non-empty
    pub async fn read_outbound(&self) -> Option<Vec<u8>> {
        match tokio::fs::read(&self.client).await {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            Ok(_) => None,
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %self.client.display(), error = %e, "Unable to read status document");
                None
            }
        }
    }

    /// Replace the outbound status document
    pub async fn write_outbound(&self, document: &Value) -> Result<()> {
        tokio::fs::write(&self.client, serde_json::to_vec(document)?).await?;
        Ok(())
    }

    /// Delete the outbound status document; returns whether one existed
    pub async fn remove_outbound(&self) -> Result<bool> {
        match tokio::fs::remove_file(&self.client).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Store a downloaded manifest through the scratch file
    pub async fn store_download(&self, bytes: &[u8]) -> Result<()> {
        tokio::fs::write(&self.scratch, bytes).await?;
        tokio::fs::rename(&self.scratch, &self.server).await?;
        Ok(())
    }

    /// Parse the cached manifest, if one exists
    pub async fn parse_server(&self) -> Result<Option<Value>> {
        match tokio::fs::read(&self.server).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// JSON pointer to a receiver's entry in the manifest
pub fn manifest_pointer(key: &str) -> String {
    format!("/manifest/{}", key.replace('~', "~0").replace('/', "~1"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_download_replaces_cached_manifest() {
        let dir = TempDir::new().unwrap();
        let files = ManifestFiles::new(dir.path());
        assert!(files.server_hash().await.unwrap().is_none());
        assert!(files.parse_server().await.unwrap().is_none());

        files.store_download(br#"{"manifest":{}}"#).await.unwrap();
        assert_eq!(
            files.server_hash().await.unwrap(),
            Some(hash_hex(br#"{"manifest":{}}"#))
        );
        assert!(!dir.path().join(SCRATCH_FILE).exists());

        let parsed = files.parse_server().await.unwrap().unwrap();
        assert_eq!(parsed, json!({"manifest": {}}));
    }

    #[tokio::test]
    async fn test_outbound_document_lifecycle() {
        let dir = TempDir::new().unwrap();
        let files = ManifestFiles::new(dir.path());
        assert!(files.read_outbound().await.is_none());
        assert!(!files.remove_outbound().await.unwrap());

        files.write_outbound(&json!({"uploader": {"power": true}})).await.unwrap();
        let bytes = files.read_outbound().await.unwrap();
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["uploader"]["power"], true);

        assert!(files.remove_outbound().await.unwrap());
        assert!(files.read_outbound().await.is_none());
    }

    #[test]
    fn test_manifest_pointer_escapes_key() {
        let manifest = json!({"manifest": {"a/b": 1, "uploader": 2}});
        assert_eq!(manifest.pointer(&manifest_pointer("uploader")), Some(&json!(2)));
        assert_eq!(manifest.pointer(&manifest_pointer("a/b")), Some(&json!(1)));
        assert_eq!(manifest.pointer(&manifest_pointer("missing")), None);
    }
}
