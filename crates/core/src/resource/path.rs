//! Resolution of the `path` shorthand into folder and file name.

/// Resolve the `(folder, file_name)` pair for a managed file.
///
/// A non-empty `path` wins: everything before its last `/` is the folder and
/// the last segment is the file name. Otherwise `folder` and `file_name` are
/// used verbatim.
pub fn resolve_path(path: &str, folder: &str, file_name: &str) -> (String, String) {
    if path.is_empty() {
        return (folder.to_string(), file_name.to_string());
    }

    match path.rsplit_once('/') {
        Some((folder, file)) => (folder.to_string(), file.to_string()),
        None => (String::new(), path.to_string()),
    }
}
