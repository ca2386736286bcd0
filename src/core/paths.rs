//! Path helpers for config-relative locations.

use std::path::{Component, Path, PathBuf};

/// Resolve `path` against `base` when it is relative, then drop `.` and `..`
/// components without touching the filesystem.
///
/// Script directories and log paths in a config file are written relative to
/// that file, not to whatever directory the daemon happens to start in.
#[must_use]
pub fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    normalize_syntactic(&joined)
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => match components.last() {
                Some(Component::Normal(_)) => {
                    components.pop();
                }
                // Relative path climbing above its base: keep the `..`.
                None | Some(Component::ParentDir) => components.push(component),
                _ => {}
            },
        }
    }
    if components.is_empty() {
        return PathBuf::from(".");
    }
    components.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_path_is_kept() {
        let resolved = resolve_against(Path::new("/etc/chaosd"), Path::new("/srv/scripts"));
        assert_eq!(resolved, PathBuf::from("/srv/scripts"));
    }

    #[test]
    fn relative_path_joins_base() {
        let resolved = resolve_against(Path::new("/etc/chaosd"), Path::new("./scripts/../hooks"));
        assert_eq!(resolved, PathBuf::from("/etc/chaosd/hooks"));
    }

    #[test]
    fn parent_at_root_is_dropped() {
        let resolved = resolve_against(Path::new("/"), Path::new("../foo"));
        assert_eq!(resolved, PathBuf::from("/foo"));
    }

    #[test]
    fn relative_base_keeps_leading_parents() {
        let resolved = resolve_against(Path::new(""), Path::new("../x"));
        assert_eq!(resolved, PathBuf::from("../x"));
        assert_eq!(resolve_against(Path::new("."), Path::new(".")), PathBuf::from("."));
    }
}
