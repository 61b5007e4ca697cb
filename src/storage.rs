//! Asset storage access: signed download URLs and order archives.
//!
//! Signed URLs are HMAC-scoped to a storage key and expiry so the CDN can
//! verify them statelessly. Archives prefer the storage backend's bulk
//! endpoint when one is configured and otherwise fall back to fetching
//! each asset and zipping locally.

use std::io::Write;

use reqwest::Client;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::crypto;
use crate::error::{AppError, Result};

/// Seconds a redemption-time signed URL stays valid. Redemption already
/// decremented the token budget, so the link only needs to survive the
/// redirect.
const REDEMPTION_URL_TTL_SECS: i64 = 15 * 60;

#[derive(Debug, Clone)]
pub struct Storage {
    http: Client,
    cdn_base: String,
    url_secret: String,
    archive_endpoint: Option<String>,
}

/// One file of a locally built archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub file_name: String,
    pub url: String,
}

impl Storage {
    pub fn new(
        cdn_base: impl Into<String>,
        url_secret: impl Into<String>,
        archive_endpoint: Option<String>,
    ) -> Self {
        Self {
            http: Client::new(),
            cdn_base: cdn_base.into(),
            url_secret: url_secret.into(),
            archive_endpoint,
        }
    }

    /// Signed URL for a storage key, valid until `expires_at`.
    pub fn signed_url(&self, storage_key: &str, expires_at: i64) -> String {
        let message = format!("{}.{}", storage_key, expires_at);
        let sig = crypto::hmac_sha256_hex(self.url_secret.as_bytes(), message.as_bytes());
        format!(
            "{}/{}?exp={}&sig={}",
            self.cdn_base.trim_end_matches('/'),
            storage_key,
            expires_at,
            sig
        )
    }

    /// Short-lived signed URL minted at redemption time.
    pub fn redemption_url(&self, storage_key: &str, now: i64) -> String {
        self.signed_url(storage_key, now + REDEMPTION_URL_TTL_SECS)
    }

    /// Bulk archive URL from the storage backend, when it supports one.
    /// None means the caller must build the archive locally.
    pub fn remote_archive_url(&self, storage_keys: &[String], now: i64) -> Option<String> {
        let endpoint = self.archive_endpoint.as_deref()?;
        let expires_at = now + REDEMPTION_URL_TTL_SECS;
        let keys = storage_keys.join(",");
        let message = format!("{}.{}", keys, expires_at);
        let sig = crypto::hmac_sha256_hex(self.url_secret.as_bytes(), message.as_bytes());
        Some(format!(
            "{}?keys={}&exp={}&sig={}",
            endpoint.trim_end_matches('/'),
            urlencoding::encode(&keys),
            expires_at,
            sig
        ))
    }

    /// Fetch every entry and build a zip archive in memory.
    /// A failed fetch is a transient dependency failure; the caller's
    /// request fails and can be retried.
    pub async fn build_archive(&self, entries: &[ArchiveEntry]) -> Result<Vec<u8>> {
        let mut files = Vec::with_capacity(entries.len());
        for entry in entries {
            let response = self
                .http
                .get(&entry.url)
                .send()
                .await
                .map_err(|e| AppError::Upstream(format!("Asset fetch failed: {}", e)))?;

            if !response.status().is_success() {
                return Err(AppError::Upstream(format!(
                    "Asset fetch failed: {} returned {}",
                    entry.file_name,
                    response.status()
                )));
            }

            let bytes = response
                .bytes()
                .await
                .map_err(|e| AppError::Upstream(format!("Asset fetch failed: {}", e)))?;
            files.push((entry.file_name.clone(), bytes.to_vec()));
        }

        write_archive(&files)
    }
}

/// Pack named files into a zip archive.
pub fn write_archive(files: &[(String, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = ZipWriter::new(&mut cursor);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for (name, bytes) in files {
            writer
                .start_file(name.as_str(), options)
                .map_err(|e| AppError::Internal(format!("Archive write failed: {}", e)))?;
            writer
                .write_all(bytes)
                .map_err(|e| AppError::Internal(format!("Archive write failed: {}", e)))?;
        }

        writer
            .finish()
            .map_err(|e| AppError::Internal(format!("Archive write failed: {}", e)))?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_storage() -> Storage {
        Storage::new("https://cdn.example.com", "test-url-secret", None)
    }

    #[test]
    fn signed_url_is_deterministic_and_key_scoped() {
        let storage = test_storage();
        let a = storage.signed_url("art/p1/full.png", 1000);
        assert_eq!(a, storage.signed_url("art/p1/full.png", 1000));
        assert_ne!(a, storage.signed_url("art/p2/full.png", 1000));
        assert_ne!(a, storage.signed_url("art/p1/full.png", 2000));
        assert!(a.starts_with("https://cdn.example.com/art/p1/full.png?exp=1000&sig="));
    }

    #[test]
    fn remote_archive_url_requires_endpoint() {
        let storage = test_storage();
        assert!(storage
            .remote_archive_url(&["k1".to_string()], 1000)
            .is_none());

        let storage = Storage::new(
            "https://cdn.example.com",
            "test-url-secret",
            Some("https://archive.example.com/bulk".to_string()),
        );
        let url = storage
            .remote_archive_url(&["k1".to_string(), "k2".to_string()], 1000)
            .unwrap();
        let expected_exp = 1000 + REDEMPTION_URL_TTL_SECS;
        assert!(url.starts_with(&format!(
            "https://archive.example.com/bulk?keys=k1%2Ck2&exp={}&sig=",
            expected_exp
        )));
    }

    #[test]
    fn write_archive_produces_readable_zip() {
        let files = vec![
            ("one.png".to_string(), vec![1u8, 2, 3]),
            ("two.png".to_string(), vec![4u8, 5]),
        ];
        let bytes = write_archive(&files).unwrap();

        let mut archive =
            zip::ZipArchive::new(std::io::Cursor::new(bytes)).expect("valid zip archive");
        assert_eq!(archive.len(), 2);
        let mut names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["one.png", "two.png"]);
    }
}
