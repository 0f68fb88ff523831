//! Name validation, sanitization and materialized path helpers.

use sqlx::SqliteConnection;

use super::record::FileRepository;
use super::{DEFAULT_FILE_BASE, MAX_NAME_LENGTH};
use crate::{Result, VaultError};

/// Give up looking for a free ` (n)` name after this many attempts.
const MAX_UNIQUE_NAME_ATTEMPTS: u32 = 10_000;

/// Join a parent path and a name into a materialized path.
///
/// Root-level entries have no parent path and their path is the name itself.
pub fn join_path(parent: Option<&str>, name: &str) -> String {
    match parent {
        Some(parent) if !parent.is_empty() => format!("{parent}/{name}"),
        _ => name.to_string(),
    }
}

/// Split a file name into base and extension.
///
/// A leading dot does not start an extension (`.gitkeep` has none).
pub fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], Some(&name[pos + 1..])),
        _ => (name, None),
    }
}

fn is_directory_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.' | '(' | ')')
}

/// Validate a directory name and return it trimmed.
pub fn validate_directory_name(name: &str) -> Result<String> {
    let name = name.trim();

    if name.is_empty() {
        return Err(VaultError::Validation(
            "directory name cannot be empty".to_string(),
        ));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(VaultError::Validation(format!(
            "directory name must be at most {MAX_NAME_LENGTH} characters"
        )));
    }
    if name == "." || name == ".." {
        return Err(VaultError::Validation(format!(
            "'{name}' is not a valid directory name"
        )));
    }
    if let Some(c) = name.chars().find(|c| !is_directory_name_char(*c)) {
        return Err(VaultError::Validation(format!(
            "directory name contains an invalid character: '{c}'"
        )));
    }

    Ok(name.to_string())
}

/// Sanitize the base part of a file name (no extension).
///
/// Characters outside `[A-Za-z0-9._-]` and space become `_`; an empty result
/// becomes `file`.
pub fn sanitize_base_name(base: &str) -> String {
    let sanitized: String = base
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let sanitized = sanitized.trim();
    if sanitized.is_empty() {
        DEFAULT_FILE_BASE.to_string()
    } else {
        sanitized.to_string()
    }
}

/// Keep only the ASCII alphanumerics of an extension.
fn sanitize_extension(ext: &str) -> Option<String> {
    let ext: String = ext.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    (!ext.is_empty()).then_some(ext)
}

fn assemble(base: &str, ext: Option<&str>) -> String {
    match ext {
        Some(ext) => format!("{base}.{ext}"),
        None => base.to_string(),
    }
}

/// Sanitize a client-supplied file name.
///
/// The result is never empty and never longer than the name limit; the base
/// is shortened to make room for the extension.
pub fn sanitize_file_name(name: &str) -> String {
    let (base, ext) = split_extension(name.trim());
    let ext = ext.and_then(sanitize_extension);
    let mut base = sanitize_base_name(base);

    let ext_len = ext.as_ref().map(|e| e.len() + 1).unwrap_or(0);
    let max_base = MAX_NAME_LENGTH.saturating_sub(ext_len).max(1);
    if base.chars().count() > max_base {
        base = base.chars().take(max_base).collect();
    }

    assemble(&base, ext.as_deref())
}

/// Name for a rename request: the requested base (sanitized) with the
/// current name's extension. Any extension on the request is dropped.
pub fn rename_keeping_extension(current: &str, requested: &str) -> String {
    let (_, ext) = split_extension(current);
    let (base, _) = split_extension(requested.trim());
    let base = sanitize_base_name(base);
    sanitize_file_name(&assemble(&base, ext))
}

/// Insert a suffix between base and extension (`a.png` + `_x` = `a_x.png`).
pub fn with_suffix(name: &str, suffix: &str) -> String {
    let (base, ext) = split_extension(name);
    assemble(&format!("{base}{suffix}"), ext)
}

/// Numbered variant of a name: `image.jpg` becomes `image (2).jpg` for n = 2.
pub fn numbered_name(name: &str, n: u32) -> String {
    with_suffix(name, &format!(" ({n})"))
}

/// Reduce a file name to a character set safe for storage keys.
fn key_safe_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Storage key of a file blob.
pub fn storage_key(project_id: i64, file_id: i64, file_name: &str) -> String {
    format!(
        "project/{project_id}/files/{file_id}/{}",
        key_safe_name(file_name)
    )
}

/// Find a name that no confirmed file uses at the destination.
///
/// Returns `name` itself when free, otherwise the first free `name (n)`.
pub async fn resolve_unique_name(
    conn: &mut SqliteConnection,
    project_id: i64,
    parent_path: Option<&str>,
    name: &str,
    exclude_id: Option<i64>,
) -> Result<String> {
    let path = join_path(parent_path, name);
    if !FileRepository::path_taken(&mut *conn, project_id, &path, exclude_id).await? {
        return Ok(name.to_string());
    }

    for n in 1..=MAX_UNIQUE_NAME_ATTEMPTS {
        let candidate = numbered_name(name, n);
        let path = join_path(parent_path, &candidate);
        if !FileRepository::path_taken(&mut *conn, project_id, &path, exclude_id).await? {
            return Ok(candidate);
        }
    }

    Err(VaultError::Conflict(format!(
        "could not find a free name for '{name}'"
    )))
}
