use super::DecodeError;

/// Directory names that never make it into a packet: VCS metadata and build caches.
pub const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "__pycache__",
    "target",
    "node_modules",
];

#[must_use]
pub fn is_excluded_dir(name: &str) -> bool {
    EXCLUDED_DIRS.contains(&name)
}

/// Normalizes a packet file key to a relative, forward-slash path.
///
/// Backslashes are treated as separators, empty and `.` segments are dropped.
/// Absolute paths, `..` segments and paths inside excluded directories are
/// rejected so a decoded packet can never address anything outside its root.
pub fn normalize_relative_path(path: &str) -> Result<String, DecodeError> {
    let path = path.trim();

    if path.is_empty() {
        return Err(DecodeError::InvalidPath("path cannot be empty".to_string()));
    }

    let unified = path.replace('\\', "/");
    if unified.starts_with('/') || has_drive_prefix(&unified) {
        return Err(DecodeError::InvalidPath(format!(
            "path must be relative: {path}"
        )));
    }

    let segments: Vec<&str> = unified
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();

    if segments.is_empty() {
        return Err(DecodeError::InvalidPath("path cannot be empty".to_string()));
    }

    let (dirs, _file) = segments.split_at(segments.len() - 1);
    for segment in &segments {
        validate_segment(segment)?;
    }
    if let Some(dir) = dirs.iter().find(|d| is_excluded_dir(d)) {
        return Err(DecodeError::InvalidPath(format!(
            "path is inside excluded directory {dir}: {path}"
        )));
    }

    Ok(segments.join("/"))
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn validate_segment(segment: &str) -> Result<(), DecodeError> {
    if segment == ".." {
        return Err(DecodeError::InvalidPath(
            "path cannot contain '..'".to_string(),
        ));
    }

    if segment.len() > 255 {
        return Err(DecodeError::InvalidPath(
            "path segment cannot exceed 255 characters".to_string(),
        ));
    }

    const INVALID_CHARS: &[char] = &['\0', '\n', '\r'];
    if segment.chars().any(|c| INVALID_CHARS.contains(&c)) {
        return Err(DecodeError::InvalidPath(
            "path segment contains invalid characters".to_string(),
        ));
    }

    Ok(())
}
