//! Locating external programs on the search path.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Resolve the program named by `argv[0]` against the `PATH` of the
/// current process.
///
/// `None` means no runnable candidate exists; the executor turns that into
/// the conventional command-not-found exit.
pub fn resolve_program(name: &str) -> Option<PathBuf> {
    let search_paths = std::env::var_os("PATH").unwrap_or_default();
    search_path(&search_paths, name)
}

/// Program lookup with the search string made explicit.
///
/// Follows the `execvp` convention: a name containing a slash is a path
/// and is used as given (absolute, or relative to the current directory);
/// any other name is tried against each directory of `search_paths` in
/// order. Only executable regular files count, so a stray directory or a
/// data file shadowing a program name is skipped.
pub fn search_path(search_paths: &OsStr, name: &str) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }

    if name.contains('/') {
        let path = Path::new(name);
        return is_executable(path).then(|| path.to_path_buf());
    }

    std::env::split_paths(search_paths)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}
