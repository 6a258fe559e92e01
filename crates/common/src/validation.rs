//! Validation of client-supplied names before they touch the filesystem.

use anyhow::{anyhow, Result};
use std::path::{Component, Path, PathBuf};

/// Maximum length kept from an uploaded file name
pub const MAX_UPLOAD_NAME_LENGTH: usize = 128;

/// Validate string length
pub fn validate_length(value: &str, max_length: usize, field_name: &str) -> Result<()> {
    if value.len() > max_length {
        return Err(anyhow!(
            "{} exceeds maximum length of {} characters (got {})",
            field_name,
            max_length,
            value.len()
        ));
    }
    Ok(())
}

/// Reduce an uploaded file name to a single safe path component.
///
/// Directory parts are dropped, anything outside `[A-Za-z0-9._-]` becomes `_`,
/// and the result is truncated. Empty input yields `"upload"`.
pub fn sanitize_upload_name(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim_start_matches('.');

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_UPLOAD_NAME_LENGTH)
        .collect();

    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

/// Join `relative` onto `base_dir`, rejecting traversal and absolute paths.
pub fn validate_path_components(relative: &Path, base_dir: &Path, field_name: &str) -> Result<PathBuf> {
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(anyhow!(
                    "{} must be a relative path without '..' components",
                    field_name
                ))
            }
        }
    }
    Ok(base_dir.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_upload_name() {
        assert_eq!(sanitize_upload_name("clip.mp4"), "clip.mp4");
        assert_eq!(sanitize_upload_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_upload_name("C:\\videos\\my clip.mp4"), "my_clip.mp4");
        assert_eq!(sanitize_upload_name(".hidden"), "hidden");
        assert_eq!(sanitize_upload_name(""), "upload");
        assert_eq!(sanitize_upload_name(&"a".repeat(500)).len(), MAX_UPLOAD_NAME_LENGTH);
    }

    #[test]
    fn test_validate_path_components() {
        let base = Path::new("/tmp/results");
        assert_eq!(
            validate_path_components(Path::new("abc/crop.jpg"), base, "path").unwrap(),
            PathBuf::from("/tmp/results/abc/crop.jpg")
        );
        assert!(validate_path_components(Path::new("../escape"), base, "path").is_err());
        assert!(validate_path_components(Path::new("/abs"), base, "path").is_err());
    }

    #[test]
    fn test_validate_length() {
        assert!(validate_length("abc", 3, "name").is_ok());
        assert!(validate_length("abcd", 3, "name").is_err());
    }
}
