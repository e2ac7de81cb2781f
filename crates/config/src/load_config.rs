// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

use path_clean::clean;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_NAME: &str = "veil.config.yaml";

pub type FindInParent = fn(&Path, &str) -> Option<PathBuf>;

/// Walk up from `start` looking for `filename`
pub fn find_in_parent(start: &Path, filename: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(filename))
        .find(|candidate| candidate.exists())
}

/// Decide which config file to load.
///
/// An explicit path wins (relative paths are taken from `cwd`), then the nearest
/// `filename` above `cwd`, then `default_config_dir/filename`.
pub fn resolve_config_path(
    find: FindInParent,
    cwd: &Path,
    default_config_dir: &Path,
    filename: &str,
    explicit: Option<&Path>,
) -> PathBuf {
    match explicit {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => clean(cwd.join(path)),
        None => find(cwd, filename).unwrap_or_else(|| clean(default_config_dir.join(filename))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn not_found(_: &Path, _: &str) -> Option<PathBuf> {
        None
    }

    fn found(_: &Path, _: &str) -> Option<PathBuf> {
        Some(PathBuf::from("/work/veil.config.yaml"))
    }

    #[test]
    fn test_resolution_order() {
        let cwd = Path::new("/work/loans");
        let defaults = Path::new("/home/me/.config/veil");

        assert_eq!(
            resolve_config_path(not_found, cwd, defaults, DEFAULT_CONFIG_NAME, None),
            PathBuf::from("/home/me/.config/veil/veil.config.yaml")
        );
        assert_eq!(
            resolve_config_path(found, cwd, defaults, DEFAULT_CONFIG_NAME, None),
            PathBuf::from("/work/veil.config.yaml")
        );
        assert_eq!(
            resolve_config_path(
                found,
                cwd,
                defaults,
                DEFAULT_CONFIG_NAME,
                Some(Path::new("/etc/veil.yaml"))
            ),
            PathBuf::from("/etc/veil.yaml")
        );
        assert_eq!(
            resolve_config_path(
                found,
                cwd,
                defaults,
                DEFAULT_CONFIG_NAME,
                Some(Path::new("../veil.yaml"))
            ),
            PathBuf::from("/work/veil.yaml")
        );
    }
}
