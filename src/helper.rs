//! Small filesystem and parameter helpers shared by the LVM and cgroup code.

use std::collections::HashMap;
use std::path::Path;

use uuid::Uuid;

/// Returns true if `path` exists and is a regular file.
pub fn file_exists(path: impl AsRef<Path>) -> bool {
    std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

/// Returns true if `path` exists and is a directory.
pub fn dir_exists(path: impl AsRef<Path>) -> bool {
    std::fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
}

/// Validates a UUID in its canonical hyphenated form
/// (`xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`).
///
/// Kubelet names pod slices after the hyphenated form, so the simple, braced
/// and URN encodings that `Uuid::parse_str` also accepts are rejected here.
pub fn is_valid_uuid(s: &str) -> bool {
    s.len() == 36 && Uuid::parse_str(s).is_ok()
}

/// Looks up `key` in `params` ignoring ASCII case.
///
/// Storage class parameters are user-typed, so `VGName`, `vgname` and
/// `VGNAME` all resolve. If several keys differ only in case the first match
/// in iteration order wins; values are returned untouched.
pub fn get_insensitive_parameter<'a>(
    params: &'a HashMap<String, String>,
    key: &str,
) -> Option<&'a str> {
    params.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)).map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_and_dir_exists() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("io.max");
        std::fs::write(&file, "").unwrap();

        assert!(dir_exists(dir.path()));
        assert!(!file_exists(dir.path()));
        assert!(file_exists(&file));
        assert!(!dir_exists(&file));
        assert!(!file_exists(dir.path().join("missing")));
    }

    #[test]
    fn test_is_valid_uuid() {
        assert!(is_valid_uuid("5f4b1c3e-2a9d-4a7e-8f0b-1c2d3e4f5a6b"));
        assert!(!is_valid_uuid("not-a-uuid"));
        assert!(!is_valid_uuid(""));
        // simple form parses as a UUID but is not canonical
        assert!(!is_valid_uuid("5f4b1c3e2a9d4a7e8f0b1c2d3e4f5a6b"));
    }

    #[test]
    fn test_get_insensitive_parameter() {
        let params = HashMap::from([
            ("VGName".to_string(), "lvmvg".to_string()),
            ("fsType".to_string(), "ext4".to_string()),
        ]);

        assert_eq!(get_insensitive_parameter(&params, "vgname"), Some("lvmvg"));
        assert_eq!(get_insensitive_parameter(&params, "FSTYPE"), Some("ext4"));
        assert_eq!(get_insensitive_parameter(&params, "missing"), None);
    }
}
