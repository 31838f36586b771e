use std::{
    env,
    path::{Path, PathBuf},
};

/// Environment variable consulted when no root is configured explicitly.
pub const APP_ROOT_ENV: &str = "APP_ROOT";

/// Errors for resolving the application root directory
#[derive(Debug, thiserror::Error)]
pub enum RootDirError {
    #[error("HOME environment variable is not set")]
    HomeMissing,
    #[error("app root must be an absolute path (after ~ expansion): {0}")]
    AbsoluteRequired(String),
    #[error("app root is not a directory: {0}")]
    NotADirectory(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolve the application root.
///
/// Rules:
/// - An explicit value wins; a leading `~` expands to `$HOME`.
/// - Otherwise `$APP_ROOT` is used when set and non-empty.
/// - Otherwise the current working directory.
///
/// The result must be absolute and name an existing directory.
pub fn resolve_app_root(configured: Option<String>) -> Result<PathBuf, RootDirError> {
    let path = match configured {
        Some(raw) => {
            let expanded = expand_tilde(&raw)?;
            if !expanded.is_absolute() {
                return Err(RootDirError::AbsoluteRequired(raw));
            }
            expanded
        }
        None => match env::var(APP_ROOT_ENV) {
            Ok(v) if !v.trim().is_empty() => {
                let expanded = expand_tilde(&v)?;
                if !expanded.is_absolute() {
                    return Err(RootDirError::AbsoluteRequired(v));
                }
                expanded
            }
            _ => env::current_dir()?,
        },
    };

    if !path.is_dir() {
        return Err(RootDirError::NotADirectory(path.display().to_string()));
    }
    Ok(path)
}

fn expand_tilde(raw: &str) -> Result<PathBuf, RootDirError> {
    if raw == "~" {
        let home = env::var("HOME").map_err(|_| RootDirError::HomeMissing)?;
        return Ok(PathBuf::from(home));
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        let home = env::var("HOME").map_err(|_| RootDirError::HomeMissing)?;
        return Ok(Path::new(&home).join(rest));
    }
    Ok(PathBuf::from(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn explicit_absolute_directory_is_accepted() {
        let tmp = tempdir().unwrap();
        let root = resolve_app_root(Some(tmp.path().to_string_lossy().into_owned())).unwrap();
        assert_eq!(root, tmp.path());
    }

    #[test]
    fn relative_root_is_rejected() {
        let err = resolve_app_root(Some("relative/dir".into())).unwrap_err();
        assert!(matches!(err, RootDirError::AbsoluteRequired(_)));
    }

    #[test]
    fn missing_directory_is_rejected() {
        let tmp = tempdir().unwrap();
        let gone = tmp.path().join("gone");
        let err = resolve_app_root(Some(gone.to_string_lossy().into_owned())).unwrap_err();
        assert!(matches!(err, RootDirError::NotADirectory(_)));
    }
}
