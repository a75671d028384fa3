//! Key/prefix path helpers
//!
//! Node ids follow the S3 key model: the bucket root is `/`, directories use
//! their common-prefix form with a trailing slash (`docs/sub/`) and files use
//! their object key (`docs/sub/a.txt`). Keeping the trailing slash on
//! directories means a file `docs` and a directory `docs/` never collide.

/// Id and path of the root node
pub const ROOT_ID: &str = "/";

/// Whether `path` designates the bucket root (`""`, `"/"`, `"//"`, ...)
pub fn is_root(path: &str) -> bool {
    path.trim_matches('/').is_empty()
}

/// Canonical directory id: `/` for the root, otherwise `a/b/`
pub fn normalize_directory(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        ROOT_ID.to_string()
    } else {
        format!("{}/", segments.join("/"))
    }
}

/// Listing prefix for a directory: empty for the root, `a/b/` otherwise
pub fn to_prefix(directory: &str) -> String {
    if is_root(directory) {
        String::new()
    } else {
        normalize_directory(directory)
    }
}

/// Object key without a leading slash
pub fn normalize_key(key: &str) -> String {
    key.trim_start_matches('/').to_string()
}

/// Directory containing `path`.
///
/// `docs/a.txt` -> `docs/`, `docs/sub/` -> `docs/`, `readme.txt` -> `/`.
pub fn parent_directory(path: &str) -> String {
    let trimmed = path.trim_start_matches('/').trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => normalize_directory(&trimmed[..=idx]),
        None => ROOT_ID.to_string(),
    }
}

/// Last non-empty segment of a path
pub fn last_segment(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or_default()
}

/// Key of `name` placed inside `directory`
pub fn join(directory: &str, name: &str) -> String {
    format!("{}{}", to_prefix(directory), name.trim_matches('/'))
}

/// Number of segments below the root
pub fn depth(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}

/// Whether `path` equals `directory` or lies somewhere below it
pub fn is_within(path: &str, directory: &str) -> bool {
    if is_root(directory) {
        return true;
    }
    let prefix = normalize_directory(directory);
    path == prefix || path.trim_start_matches('/').starts_with(&prefix)
}

/// Materialize a directory entry returned by a listing of `base`.
///
/// Entries with a leading slash, or already carrying the base prefix, are
/// absolute. A bare segment (`sub` or `sub/`) is relative to `base`. Returns
/// `None` for empty entries and for entries resolving to `base` itself.
pub fn resolve_directory_entry(base: &str, entry: &str) -> Option<String> {
    if is_root(entry) {
        return None;
    }

    let base_prefix = to_prefix(base);
    let inner = entry.trim_matches('/');

    let resolved = if entry.starts_with('/') {
        normalize_directory(entry)
    } else if !base_prefix.is_empty() && entry.starts_with(&base_prefix) {
        normalize_directory(entry)
    } else if !inner.contains('/') {
        normalize_directory(&format!("{}{}", base_prefix, inner))
    } else {
        // multi-segment common prefix outside the base prefix: already absolute
        normalize_directory(entry)
    };

    if resolved == normalize_directory(base) {
        None
    } else {
        Some(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_directory() {
        assert_eq!(normalize_directory(""), "/");
        assert_eq!(normalize_directory("/"), "/");
        assert_eq!(normalize_directory("/docs"), "docs/");
        assert_eq!(normalize_directory("docs/sub/"), "docs/sub/");
        assert_eq!(normalize_directory("//docs//sub"), "docs/sub/");
    }

    #[test]
    fn test_to_prefix() {
        assert_eq!(to_prefix("/"), "");
        assert_eq!(to_prefix(""), "");
        assert_eq!(to_prefix("/docs"), "docs/");
    }

    #[test]
    fn test_parent_directory() {
        assert_eq!(parent_directory("docs/a.txt"), "docs/");
        assert_eq!(parent_directory("docs/sub/"), "docs/");
        assert_eq!(parent_directory("readme.txt"), "/");
        assert_eq!(parent_directory("/docs/"), "/");
        assert_eq!(parent_directory("a/b/c/d.bin"), "a/b/c/");
    }

    #[test]
    fn test_last_segment_and_join() {
        assert_eq!(last_segment("docs/sub/"), "sub");
        assert_eq!(last_segment("docs/a.txt"), "a.txt");
        assert_eq!(join("/", "a.txt"), "a.txt");
        assert_eq!(join("docs/", "a.txt"), "docs/a.txt");
        assert_eq!(join("/docs", "/new/"), "docs/new");
    }

    #[test]
    fn test_depth_and_within() {
        assert_eq!(depth("/"), 0);
        assert_eq!(depth("docs/"), 1);
        assert_eq!(depth("docs/a.txt"), 2);
        assert!(is_within("docs/a.txt", "docs/"));
        assert!(is_within("docs/", "docs/"));
        assert!(is_within("anything", "/"));
        assert!(!is_within("documents/a.txt", "docs/"));
    }

    #[test]
    fn test_resolve_directory_entry() {
        assert_eq!(resolve_directory_entry("/", "/docs").as_deref(), Some("docs/"));
        assert_eq!(resolve_directory_entry("/", "docs/").as_deref(), Some("docs/"));
        assert_eq!(resolve_directory_entry("docs/", "docs/sub/").as_deref(), Some("docs/sub/"));
        assert_eq!(resolve_directory_entry("docs/", "sub").as_deref(), Some("docs/sub/"));
        assert_eq!(resolve_directory_entry("docs/", "/other/x").as_deref(), Some("other/x/"));
        assert_eq!(resolve_directory_entry("docs/", "docs/"), None);
        assert_eq!(resolve_directory_entry("docs/", ""), None);
    }
}
