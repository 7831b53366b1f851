//! Shared key generation for storage backends.
//!
//! Key format: `{folder}/{uuid}.{ext}`, or `{uuid}.{ext}` when no folder is given.

use crate::{StorageError, StorageResult};
use uuid::Uuid;

const MAX_EXTENSION_LEN: usize = 16;

/// Generate a unique object key for `filename` inside `folder`.
///
/// Only the extension of `filename` survives; the stem is replaced by a uuid v4.
pub fn generate_object_key(folder: &str, filename: &str) -> StorageResult<String> {
    let folder = normalize_folder(folder)?;
    let name = match extension(filename) {
        Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
        None => Uuid::new_v4().to_string(),
    };

    if folder.is_empty() {
        Ok(name)
    } else {
        Ok(format!("{}/{}", folder, name))
    }
}

/// Reject keys that could escape the storage root.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.contains("..") || key.starts_with('/') || key.contains('\\') {
        return Err(StorageError::InvalidKey(
            "Storage key contains invalid characters".to_string(),
        ));
    }
    Ok(())
}

/// Strip `base_url` from `url`, returning the object key.
pub fn key_from_url<'a>(base_url: &str, url: &'a str) -> StorageResult<&'a str> {
    let base = base_url.trim_end_matches('/');
    let key = url
        .strip_prefix(base)
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(|| {
            StorageError::InvalidKey(format!("URL does not belong to this storage: {}", url))
        })?;
    validate_key(key)?;
    Ok(key)
}

/// Canonical form of a folder path: trimmed, no empty, `.` or `..` segments.
pub fn normalize_folder(folder: &str) -> StorageResult<String> {
    let trimmed = folder.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    validate_key(trimmed)?;
    if trimmed
        .split('/')
        .any(|segment| segment.is_empty() || segment == ".")
    {
        return Err(StorageError::InvalidKey(format!(
            "Invalid folder name: {}",
            folder
        )));
    }
    Ok(trimmed.to_string())
}

fn extension(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() && !filename.starts_with('.') {
        return None;
    }
    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_keeps_extension_and_folder() {
        let key = generate_object_key("products", "Course Bundle.ZIP").unwrap();
        assert!(key.starts_with("products/"));
        assert!(key.ends_with(".zip"));
        assert!(!key.contains("Course"));
    }

    #[test]
    fn test_keys_are_unique() {
        let a = generate_object_key("products", "a.pdf").unwrap();
        let b = generate_object_key("products", "a.pdf").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_folder_and_missing_extension() {
        let key = generate_object_key("", "README").unwrap();
        assert!(!key.contains('/'));
        assert!(!key.contains('.'));
    }

    #[test]
    fn test_traversal_rejected() {
        assert!(generate_object_key("../etc", "a.txt").is_err());
        assert!(generate_object_key("a//b", "a.txt").is_err());
        assert!(key_from_url("http://cdn", "http://cdn/../secret").is_err());
    }

    #[test]
    fn test_key_from_url() {
        let key = key_from_url("http://cdn/files/", "http://cdn/files/products/x.zip").unwrap();
        assert_eq!(key, "products/x.zip");
        assert!(key_from_url("http://cdn/files", "http://other/products/x.zip").is_err());
    }
}
