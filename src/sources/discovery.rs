//! Reading raw credential triples off disk.

use std::path::Path;

use serde::Deserialize;

/// One credential as found in a source file, before it becomes a `KeyRecord`.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveredCredential {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SourceShape {
    Single(DiscoveredCredential),
    Many(Vec<DiscoveredCredential>),
}

/// Read and parse one credential source file. Missing or malformed sources
/// are not fatal: they yield an empty list, logged at debug.
pub fn read_source(path: &Path) -> Vec<DiscoveredCredential> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "credential source unreadable, skipping");
            return Vec::new();
        }
    };

    match serde_json::from_str::<SourceShape>(&contents) {
        Ok(SourceShape::Single(cred)) => vec![cred],
        Ok(SourceShape::Many(creds)) => creds,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "credential source malformed, skipping");
            Vec::new()
        }
    }
}

/// Read every given source path and merge the results, preserving priority
/// order (earlier sources first).
pub fn read_all(paths: &[std::path::PathBuf]) -> Vec<DiscoveredCredential> {
    paths.iter().flat_map(|p| read_source(p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_source_yields_empty() {
        let dir = tempdir().unwrap();
        let creds = read_source(&dir.path().join("nope.json"));
        assert!(creds.is_empty());
    }

    #[test]
    fn malformed_source_yields_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("creds.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(read_source(&path).is_empty());
    }

    #[test]
    fn single_object_source_parses() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("creds.json");
        std::fs::write(
            &path,
            r#"{"access_token":"a","refresh_token":"r","expires_at":123}"#,
        )
        .unwrap();
        let creds = read_source(&path);
        assert_eq!(creds.len(), 1);
        assert_eq!(creds[0].access_token, "a");
    }

    #[test]
    fn array_source_parses_multiple() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("creds.json");
        std::fs::write(
            &path,
            r#"[{"access_token":"a","refresh_token":"r"},{"access_token":"b","refresh_token":"r2"}]"#,
        )
        .unwrap();
        assert_eq!(read_source(&path).len(), 2);
    }
}
