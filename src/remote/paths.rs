//! Path containment for remote file operations.
//!
//! Every file and listing operation resolves the caller's path against
//! the server's root directory before any command is rendered. The check
//! is purely lexical: `.` and empty segments collapse, `..` pops, and a
//! pop that would climb past the root rejects the whole request. Remote
//! symlinks are out of scope; the connect user's filesystem permissions
//! bound what a crafted link could expose.

use crate::error::{Error, Result};

/// Resolves `requested` (relative to `root`) into an absolute remote
/// path, rejecting any form that escapes the root. An empty or `.`
/// request resolves to the root itself.
pub fn resolve_within_root(root: &str, requested: &str) -> Result<String> {
    let root = root.trim_end_matches('/');
    let mut stack: Vec<&str> = root.split('/').filter(|s| !s.is_empty()).collect();
    let base_depth = stack.len();

    for segment in requested.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                if stack.len() <= base_depth {
                    return Err(Error::path_traversal(requested));
                }
                stack.pop();
            }
            other => stack.push(other),
        }
    }

    Ok(format!("/{}", stack.join("/")))
}

/// Strips directory components from an uploaded filename and reduces it
/// to `[A-Za-z0-9._-]`. Names that vanish under sanitization (empty,
/// dots only, nothing but hostile characters) are rejected.
pub fn sanitize_filename(raw: &str) -> Result<String> {
    let base = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let cleaned = cleaned.trim_matches('.');

    if cleaned.is_empty() {
        return Err(Error::unsupported_file(raw, "filename is empty after sanitization"));
    }
    Ok(cleaned.to_string())
}

/// The file extension, lowercased, if any.
pub fn extension(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = "/home/mc/minecraft/mc-abc-0001";

    #[test]
    fn plain_relative_paths_resolve_under_root() {
        assert_eq!(
            resolve_within_root(ROOT, "server.properties").unwrap(),
            "/home/mc/minecraft/mc-abc-0001/server.properties"
        );
        assert_eq!(
            resolve_within_root(ROOT, "plugins/Essentials/config.yml").unwrap(),
            "/home/mc/minecraft/mc-abc-0001/plugins/Essentials/config.yml"
        );
    }

    #[test]
    fn root_itself_is_accepted() {
        assert_eq!(resolve_within_root(ROOT, "").unwrap(), ROOT);
        assert_eq!(resolve_within_root(ROOT, ".").unwrap(), ROOT);
        assert_eq!(resolve_within_root(ROOT, "logs/..").unwrap(), ROOT);
    }

    #[test]
    fn dot_segments_collapse_inside_the_root() {
        assert_eq!(
            resolve_within_root(ROOT, "logs/../config/./bukkit.yml").unwrap(),
            "/home/mc/minecraft/mc-abc-0001/config/bukkit.yml"
        );
        assert_eq!(
            resolve_within_root(ROOT, "a//b///c").unwrap(),
            "/home/mc/minecraft/mc-abc-0001/a/b/c"
        );
    }

    #[test]
    fn escapes_are_rejected() {
        for requested in [
            "..",
            "../",
            "../../etc/passwd",
            "logs/../../other-server",
            "a/../../..",
            "plugins/../../../home/mc",
        ] {
            let err = resolve_within_root(ROOT, requested).unwrap_err();
            assert!(
                matches!(err, Error::PathTraversalRejected { .. }),
                "expected rejection for {requested:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn absolute_requests_are_grounded_at_the_root() {
        // A leading slash never replaces the root, it just collapses.
        assert_eq!(
            resolve_within_root(ROOT, "/etc/passwd").unwrap(),
            "/home/mc/minecraft/mc-abc-0001/etc/passwd"
        );
    }

    #[test]
    fn trailing_slash_on_root_is_tolerated() {
        assert_eq!(
            resolve_within_root("/home/mc/minecraft/mc-abc-0001/", "world").unwrap(),
            "/home/mc/minecraft/mc-abc-0001/world"
        );
    }

    #[test]
    fn filenames_lose_directory_components() {
        assert_eq!(sanitize_filename("upload.jar").unwrap(), "upload.jar");
        assert_eq!(sanitize_filename("/tmp/evil/upload.jar").unwrap(), "upload.jar");
        assert_eq!(sanitize_filename("..\\..\\win.jar").unwrap(), "win.jar");
        assert_eq!(sanitize_filename("sp ace&?.yml").unwrap(), "space.yml");
    }

    #[test]
    fn hostile_filenames_are_rejected() {
        for raw in ["", "..", "....", "///", "&&&"] {
            assert!(
                matches!(sanitize_filename(raw), Err(Error::UnsupportedFile { .. })),
                "expected rejection for {raw:?}"
            );
        }
    }

    #[test]
    fn extension_extraction() {
        assert_eq!(extension("server.properties").as_deref(), Some("properties"));
        assert_eq!(extension("Config.YML").as_deref(), Some("yml"));
        assert_eq!(extension("README").as_deref(), None);
        assert_eq!(extension(".bashrc").as_deref(), None);
        assert_eq!(extension("archive.tar.gz").as_deref(), Some("gz"));
    }
}
