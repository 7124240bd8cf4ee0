//! File content operations under a server root.
//!
//! Reads and writes are limited to an allow-list of text-like
//! extensions, and content crosses the wire base64-encoded in both
//! directions so no file byte is ever interpolated into a shell line.
//! Uploads additionally pass a content-signature check against the
//! declared extension: archive extensions must actually be ZIP data,
//! images must be PNG, text must not smuggle executable or archive
//! bytes, and `.jar` files are only accepted into the plugin and mod
//! directories. Downloads that need a local copy stage through
//! [`tempfile`] so the copy disappears on success and failure alike.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::connection::{into_crate_error, Connection};
use crate::error::{Error, Result};

use super::{exec_checked, paths, shell};

/// Extensions a user may read and edit as text.
pub const EDITABLE_EXTENSIONS: &[&str] = &[
    "properties", "yml", "yaml", "json", "txt", "log", "conf", "cfg", "toml",
];

/// Non-text extensions accepted for upload.
const BINARY_UPLOAD_EXTENSIONS: &[&str] = &["jar", "zip", "png"];

const ZIP_MAGICS: &[&[u8]] = &[b"PK\x03\x04", b"PK\x05\x06", b"PK\x07\x08"];
const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
/// Signatures a text-typed upload must not start with.
const FORBIDDEN_TEXT_MAGICS: &[&[u8]] = &[
    b"\x7fELF",
    b"MZ",
    b"PK\x03\x04",
    b"\x1f\x8b",
];

/// Limits applied to uploads and downloads.
#[derive(Debug, Clone, Copy)]
pub struct UploadPolicy {
    /// Maximum transfer size in bytes
    pub max_bytes: u64,
}

impl UploadPolicy {
    /// Creates a policy with the given size cap.
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 256 * 1024 * 1024,
        }
    }
}

/// Renders the command that emits a file base64-encoded.
pub fn render_read(path: &str) -> String {
    format!("base64 {}", shell::quote(path))
}

/// Renders the command that decodes base64 content into a file.
pub fn render_write(path: &str, encoded: &str) -> String {
    format!(
        "printf %s {} | base64 -d > {}",
        shell::quote(encoded),
        shell::quote(path)
    )
}

/// Reads a text file under the server root.
pub async fn read_file(
    conn: &dyn Connection,
    root: &str,
    requested: &str,
    timeout: Duration,
) -> Result<String> {
    let resolved = paths::resolve_within_root(root, requested)?;
    require_editable(requested)?;

    let output = exec_checked(conn, &render_read(&resolved), timeout).await?;
    let compact: String = output
        .stdout
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let bytes = BASE64
        .decode(compact)
        .map_err(|e| Error::Internal(format!("remote read returned invalid base64: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|_| Error::unsupported_file(requested, "file content is not valid UTF-8"))
}

/// Writes a text file under the server root.
pub async fn write_file(
    conn: &dyn Connection,
    root: &str,
    requested: &str,
    content: &str,
    timeout: Duration,
) -> Result<()> {
    let resolved = paths::resolve_within_root(root, requested)?;
    require_editable(requested)?;

    let encoded = BASE64.encode(content.as_bytes());
    exec_checked(conn, &render_write(&resolved, &encoded), timeout).await?;
    debug!(path = %resolved, bytes = content.len(), "Wrote remote file");
    Ok(())
}

/// Validates an upload and returns the sanitized filename it will land
/// under. Pure; the transfer itself happens in [`upload_file`].
pub fn validate_upload(
    policy: &UploadPolicy,
    raw_name: &str,
    destination_dir: &str,
    content: &[u8],
) -> Result<String> {
    if content.len() as u64 > policy.max_bytes {
        return Err(Error::unsupported_file(
            raw_name,
            format!("exceeds the {} byte transfer cap", policy.max_bytes),
        ));
    }

    let name = paths::sanitize_filename(raw_name)?;
    let ext = paths::extension(&name)
        .ok_or_else(|| Error::unsupported_file(&name, "missing file extension"))?;

    if !EDITABLE_EXTENSIONS.contains(&ext.as_str())
        && !BINARY_UPLOAD_EXTENSIONS.contains(&ext.as_str())
    {
        return Err(Error::unsupported_file(
            &name,
            format!("extension '{ext}' is not allowed"),
        ));
    }

    verify_magic(&name, &ext, content)?;

    if ext == "jar" && !is_jar_directory(destination_dir) {
        return Err(Error::unsupported_file(
            &name,
            "jar files are only accepted in plugins/ or mods/",
        ));
    }

    Ok(name)
}

/// Uploads validated content into a directory under the server root.
/// Returns the absolute remote path written.
pub async fn upload_file(
    conn: &dyn Connection,
    policy: &UploadPolicy,
    root: &str,
    destination_dir: &str,
    raw_name: &str,
    content: &[u8],
) -> Result<String> {
    let name = validate_upload(policy, raw_name, destination_dir, content)?;
    let dir = paths::resolve_within_root(root, destination_dir)?;
    let destination = format!("{dir}/{name}");

    conn.upload_content(content, &destination, None)
        .await
        .map_err(|e| into_crate_error(e, conn.identifier()))?;
    debug!(path = %destination, bytes = content.len(), "Uploaded file");
    Ok(destination)
}

/// Downloads a file under the server root into memory. Size-capped.
pub async fn download_file(
    conn: &dyn Connection,
    policy: &UploadPolicy,
    root: &str,
    requested: &str,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let resolved = paths::resolve_within_root(root, requested)?;
    check_remote_size(conn, policy, requested, &resolved, timeout).await?;

    conn.download_content(&resolved)
        .await
        .map_err(|e| into_crate_error(e, conn.identifier()))
}

/// Downloads a file under the server root into a temporary local file.
/// The file is deleted on drop unless the caller persists it.
pub async fn download_to_temp(
    conn: &dyn Connection,
    policy: &UploadPolicy,
    root: &str,
    requested: &str,
    timeout: Duration,
) -> Result<NamedTempFile> {
    let resolved = paths::resolve_within_root(root, requested)?;
    check_remote_size(conn, policy, requested, &resolved, timeout).await?;

    let staging = NamedTempFile::new()?;
    conn.download(&resolved, staging.path())
        .await
        .map_err(|e| into_crate_error(e, conn.identifier()))?;
    Ok(staging)
}

/// Size of a remote file in bytes.
pub async fn remote_size(conn: &dyn Connection, path: &str, timeout: Duration) -> Result<u64> {
    let command = format!("stat -c %s {}", shell::quote(path));
    let output = exec_checked(conn, &command, timeout).await?;
    output
        .stdout
        .trim()
        .parse()
        .map_err(|_| Error::Internal(format!("unparseable stat output: {:?}", output.stdout.trim())))
}

async fn check_remote_size(
    conn: &dyn Connection,
    policy: &UploadPolicy,
    requested: &str,
    resolved: &str,
    timeout: Duration,
) -> Result<()> {
    let size = remote_size(conn, resolved, timeout).await?;
    if size > policy.max_bytes {
        return Err(Error::unsupported_file(
            requested,
            format!("exceeds the {} byte transfer cap", policy.max_bytes),
        ));
    }
    Ok(())
}

fn require_editable(requested: &str) -> Result<()> {
    match paths::extension(requested) {
        Some(ext) if EDITABLE_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
        _ => Err(Error::unsupported_file(
            requested,
            "only text configuration and log files can be edited",
        )),
    }
}

fn verify_magic(name: &str, ext: &str, content: &[u8]) -> Result<()> {
    match ext {
        "jar" | "zip" => {
            if !ZIP_MAGICS.iter().any(|m| content.starts_with(m)) {
                return Err(Error::unsupported_file(name, "content is not a ZIP archive"));
            }
        }
        "png" => {
            if !content.starts_with(PNG_MAGIC) {
                return Err(Error::unsupported_file(name, "content is not a PNG image"));
            }
        }
        _ => {
            if FORBIDDEN_TEXT_MAGICS.iter().any(|m| content.starts_with(m)) {
                return Err(Error::unsupported_file(
                    name,
                    "text upload carries an executable or archive signature",
                ));
            }
        }
    }
    Ok(())
}

fn is_jar_directory(destination_dir: &str) -> bool {
    let dir = destination_dir.trim_matches('/');
    dir == "plugins"
        || dir == "mods"
        || dir.starts_with("plugins/")
        || dir.starts_with("mods/")
}
