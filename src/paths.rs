//! Storage-root path virtualization.
//!
//! Records never store absolute media paths. They store a token relative to the
//! storage root, which can move between runs (e.g. a sandbox container being
//! remounted elsewhere). Resolution joins the token to the *current* root and
//! falls back to a file-name search of the root when the literal path is gone.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Outcome of resolving a media token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    Found {
        path: PathBuf,
        /// Set when the stored token no longer matches where the file was found.
        /// Callers should persist this token in place of the old one.
        healed_token: Option<String>,
    },
    NotFound,
}

impl Resolution {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Resolution::Found { path, .. } => Some(path),
            Resolution::NotFound => None,
        }
    }

    pub fn healed_token(&self) -> Option<&str> {
        match self {
            Resolution::Found { healed_token, .. } => healed_token.as_deref(),
            Resolution::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Found { .. })
    }
}

/// Converts between absolute media paths and root-relative tokens
#[derive(Debug)]
pub struct PathVirtualizer {
    root: PathBuf,
    /// File names directly under the root, sorted. Filled on first fallback search.
    listing: OnceCell<Vec<String>>,
}

impl PathVirtualizer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            listing: OnceCell::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A fresh virtualizer for a relocated root
    pub fn with_root(&self, root: impl Into<PathBuf>) -> Self {
        Self::new(root)
    }

    /// Drop the cached root listing so the next fallback search re-reads the directory
    pub fn invalidate_cache(&mut self) {
        self.listing = OnceCell::new();
    }

    /// Token for an absolute path. Paths outside the root degrade to their file name.
    pub fn to_token(&self, path: &Path) -> String {
        if let Ok(relative) = path.strip_prefix(&self.root) {
            let token = join_components(relative);
            if !token.is_empty() {
                return token;
            }
        }

        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned())
    }

    /// Resolve a stored token against the current root.
    ///
    /// The token is tried as written first and percent-decoded second, so file
    /// names that really contain `%XX` still resolve.
    pub fn resolve(&self, token: &str) -> Resolution {
        let trimmed = token.trim();
        let literal = trimmed.strip_prefix("file://").unwrap_or(trimmed);
        if literal.is_empty() {
            return Resolution::NotFound;
        }

        let decoded = percent_decode(literal);
        let mut forms = vec![literal];
        if decoded != literal {
            forms.push(decoded.as_str());
        }

        for form in &forms {
            if let Some(found) = self.resolve_direct(token, form) {
                return found;
            }
        }

        forms
            .iter()
            .find_map(|form| self.resolve_by_file_name(token, form))
            .unwrap_or(Resolution::NotFound)
    }

    fn resolve_direct(&self, token: &str, form: &str) -> Option<Resolution> {
        let as_path = Path::new(form);

        // Legacy rows may still hold an absolute path
        if as_path.is_absolute() {
            if !as_path.is_file() {
                return None;
            }
            if as_path.strip_prefix(&self.root).is_err() {
                // Outside the root no token can reach this file; prefer a copy
                // under the root, else keep the stored link untouched
                return Some(self.resolve_by_file_name(token, form).unwrap_or(Resolution::Found {
                    path: as_path.to_path_buf(),
                    healed_token: None,
                }));
            }
        }

        let candidate = if as_path.is_absolute() {
            as_path.to_path_buf()
        } else {
            self.root.join(join_components(as_path))
        };
        if !candidate.is_file() {
            return None;
        }

        let canonical = self.to_token(&candidate);
        let healed_token = (canonical != token).then_some(canonical);
        Some(Resolution::Found { path: candidate, healed_token })
    }

    fn resolve_by_file_name(&self, token: &str, form: &str) -> Option<Resolution> {
        let file_name = final_component(form)?;
        let entry = self.cached_listing().iter().find(|entry| entry.as_str() == file_name)?;

        let path = self.root.join(entry);
        log::debug!("Resolved token '{}' by file name to {:?}", token, path);
        Some(Resolution::Found {
            path,
            healed_token: (entry != token).then(|| entry.clone()),
        })
    }

    fn cached_listing(&self) -> &[String] {
        self.listing.get_or_init(|| {
            let entries = match std::fs::read_dir(&self.root) {
                Ok(entries) => entries,
                Err(e) => {
                    log::warn!("Cannot list storage root {:?}: {}", self.root, e);
                    return Vec::new();
                }
            };

            let mut names: Vec<String> = entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            log::debug!("Listed {} files under storage root {:?}", names.len(), self.root);
            names
        })
    }
}

/// Final path component of a token, accepting either separator
pub fn final_component(token: &str) -> Option<&str> {
    token.rsplit(['/', '\\']).next().filter(|name| !name.is_empty())
}

/// Normal components joined with '/', dropping '.', '..' and root prefixes
fn join_components(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .flat_map(|part| {
            // Tokens written on another platform may use backslashes
            part.split('\\').map(str::to_string).collect::<Vec<_>>()
        })
        .filter(|part| !part.is_empty() && part != "." && part != "..")
        .collect::<Vec<_>>()
        .join("/")
}

/// Decode %XX escapes. Tokens that do not decode to UTF-8 are returned unchanged.
fn percent_decode(s: &str) -> String {
    if !s.contains('%') {
        return s.to_string();
    }

    let bytes = s.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                decoded.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }

    String::from_utf8(decoded).unwrap_or_else(|_| s.to_string())
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_to_token_strips_root() {
        let paths = PathVirtualizer::new("/data/recordings");

        assert_eq!(paths.to_token(Path::new("/data/recordings/a.m4a")), "a.m4a");
        assert_eq!(paths.to_token(Path::new("/data/recordings/2024/01/a.m4a")), "2024/01/a.m4a");
    }

    #[test]
    fn test_to_token_outside_root_degrades_to_file_name() {
        let paths = PathVirtualizer::new("/data/recordings");
        assert_eq!(paths.to_token(Path::new("/tmp/imports/b.wav")), "b.wav");
    }

    #[test]
    fn test_resolve_bare_and_nested_tokens() {
        let root = tempdir().unwrap();
        fs::write(root.path().join("bare.m4a"), b"x").unwrap();
        fs::create_dir_all(root.path().join("2024")).unwrap();
        fs::write(root.path().join("2024").join("nested.m4a"), b"x").unwrap();

        let paths = PathVirtualizer::new(root.path());

        assert_eq!(
            paths.resolve("bare.m4a"),
            Resolution::Found { path: root.path().join("bare.m4a"), healed_token: None }
        );
        assert_eq!(
            paths.resolve("2024/nested.m4a"),
            Resolution::Found { path: root.path().join("2024").join("nested.m4a"), healed_token: None }
        );
    }

    #[test]
    fn test_resolve_falls_back_to_file_name_search() {
        let root = tempdir().unwrap();
        fs::write(root.path().join("meeting.m4a"), b"x").unwrap();

        let paths = PathVirtualizer::new(root.path());
        let resolution = paths.resolve("old/layout/meeting.m4a");

        assert_eq!(resolution.path(), Some(root.path().join("meeting.m4a").as_path()));
        assert_eq!(resolution.healed_token(), Some("meeting.m4a"));
    }

    #[test]
    fn test_resolve_percent_encoded_token() {
        let root = tempdir().unwrap();
        fs::write(root.path().join("Team Sync.m4a"), b"x").unwrap();

        let paths = PathVirtualizer::new(root.path());
        let resolution = paths.resolve("Team%20Sync.m4a");

        assert!(resolution.is_found());
        assert_eq!(resolution.healed_token(), Some("Team Sync.m4a"));
    }

    #[test]
    fn test_resolve_legacy_absolute_path_under_old_root() {
        let root = tempdir().unwrap();
        fs::write(root.path().join("call.m4a"), b"x").unwrap();

        let paths = PathVirtualizer::new(root.path());
        let resolution = paths.resolve("/var/mobile/Containers/OLD-UUID/Documents/call.m4a");

        assert_eq!(resolution.path(), Some(root.path().join("call.m4a").as_path()));
        assert_eq!(resolution.healed_token(), Some("call.m4a"));
    }

    #[test]
    fn test_resolve_absolute_path_outside_root_keeps_stored_link() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        let old_root = dir.path().join("old-root");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&old_root).unwrap();
        let outside = old_root.join("call.m4a");
        fs::write(&outside, b"x").unwrap();

        let paths = PathVirtualizer::new(&root);
        let token = outside.to_string_lossy().into_owned();

        assert_eq!(
            paths.resolve(&token),
            Resolution::Found { path: outside.clone(), healed_token: None }
        );
    }

    #[test]
    fn test_resolve_absolute_path_outside_root_prefers_copy_under_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        let old_root = dir.path().join("old-root");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&old_root).unwrap();
        let outside = old_root.join("call.m4a");
        fs::write(&outside, b"x").unwrap();
        fs::write(root.join("call.m4a"), b"x").unwrap();

        let paths = PathVirtualizer::new(&root);
        let resolution = paths.resolve(&outside.to_string_lossy());

        assert_eq!(resolution.path(), Some(root.join("call.m4a").as_path()));
        assert_eq!(resolution.healed_token(), Some("call.m4a"));
        assert!(paths.resolve("call.m4a").is_found());
    }

    #[test]
    fn test_resolve_literal_percent_in_file_name() {
        let root = tempdir().unwrap();
        fs::write(root.path().join("budget%41.m4a"), b"x").unwrap();

        let paths = PathVirtualizer::new(root.path());

        assert_eq!(
            paths.resolve("budget%41.m4a"),
            Resolution::Found { path: root.path().join("budget%41.m4a"), healed_token: None }
        );
    }

    #[test]
    fn test_resolve_missing_file_is_not_found() {
        let root = tempdir().unwrap();
        let paths = PathVirtualizer::new(root.path());

        assert_eq!(paths.resolve("gone.m4a"), Resolution::NotFound);
        assert_eq!(paths.resolve(""), Resolution::NotFound);
        assert_eq!(paths.resolve("dir/"), Resolution::NotFound);
    }

    #[test]
    fn test_listing_is_cached_until_invalidated() {
        let root = tempdir().unwrap();
        let mut paths = PathVirtualizer::new(root.path());

        assert_eq!(paths.resolve("moved/late.m4a"), Resolution::NotFound);
        fs::write(root.path().join("late.m4a"), b"x").unwrap();
        assert_eq!(paths.resolve("moved/late.m4a"), Resolution::NotFound);

        paths.invalidate_cache();
        assert!(paths.resolve("moved/late.m4a").is_found());
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("a%20b"), "a b");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
        assert_eq!(percent_decode("caf%C3%A9"), "café");
    }
}
