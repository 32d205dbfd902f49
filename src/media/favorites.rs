use std::collections::BTreeSet;
use std::path::Path;

use crate::error::Result;
use crate::media::store::JsonDocument;

pub const FAVORITE_FILENAME: &str = "favorite.json";

/// Favorites of one media root, kept as a JSON array of relative paths in
/// `<root>/favorite.json`.
#[derive(Debug)]
pub struct FavoriteService {
    document: JsonDocument<BTreeSet<String>>,
}

impl FavoriteService {
    pub fn new(media_root: &Path) -> Self {
        Self {
            document: JsonDocument::new(media_root.join(FAVORITE_FILENAME)),
        }
    }

    pub fn load(&self) -> BTreeSet<String> {
        self.document.load()
    }

    pub fn save(&self, favorites: &BTreeSet<String>) -> Result<()> {
        self.document.save(favorites)
    }

    /// Flip membership of `relative_path`, returning the new state.
    pub fn toggle(&self, relative_path: &str) -> Result<bool> {
        self.document.update(|favorites| {
            if favorites.remove(relative_path) {
                false
            } else {
                favorites.insert(relative_path.to_string());
                true
            }
        })
    }

    pub fn is_favorite(&self, relative_path: &str) -> bool {
        self.load().contains(relative_path)
    }

    /// Drop `relative_path` if present. Returns whether it was a favorite.
    pub fn remove(&self, relative_path: &str) -> Result<bool> {
        if !self.is_favorite(relative_path) {
            return Ok(false);
        }
        self.document
            .update(|favorites| favorites.remove(relative_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_toggle_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let favorites = FavoriteService::new(temp_dir.path());

        assert!(!favorites.is_favorite("a.mp4"));
        assert!(favorites.toggle("a.mp4").unwrap());
        assert!(favorites.is_favorite("a.mp4"));
        assert!(!favorites.toggle("a.mp4").unwrap());
        assert!(!favorites.is_favorite("a.mp4"));
    }

    #[test]
    fn test_persisted_as_json_array() {
        let temp_dir = TempDir::new().unwrap();
        let favorites = FavoriteService::new(temp_dir.path());
        favorites.toggle("sub/b.mp4").unwrap();
        favorites.toggle("a.mp4").unwrap();

        let raw = fs::read_to_string(temp_dir.path().join(FAVORITE_FILENAME)).unwrap();
        let parsed: Vec<String> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, vec!["a.mp4", "sub/b.mp4"]);
    }

    #[test]
    fn test_membership_is_exact_match() {
        let temp_dir = TempDir::new().unwrap();
        let favorites = FavoriteService::new(temp_dir.path());
        favorites.toggle("Clip.mp4").unwrap();

        assert!(favorites.is_favorite("Clip.mp4"));
        assert!(!favorites.is_favorite("clip.mp4"));
        assert!(!favorites.is_favorite("./Clip.mp4"));
    }

    #[test]
    fn test_duplicates_in_file_collapse() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(FAVORITE_FILENAME),
            r#"["a.mp4", "a.mp4", "b.mp4"]"#,
        )
        .unwrap();

        let favorites = FavoriteService::new(temp_dir.path());
        assert_eq!(favorites.load().len(), 2);
    }

    #[test]
    fn test_malformed_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(FAVORITE_FILENAME), r#"{"a.mp4": true}"#).unwrap();

        let favorites = FavoriteService::new(temp_dir.path());
        assert!(favorites.load().is_empty());
        assert!(favorites.toggle("a.mp4").unwrap());
        assert_eq!(favorites.load().len(), 1);
    }

    #[test]
    fn test_remove() {
        let temp_dir = TempDir::new().unwrap();
        let favorites = FavoriteService::new(temp_dir.path());
        favorites.toggle("a.mp4").unwrap();

        assert!(favorites.remove("a.mp4").unwrap());
        assert!(!favorites.remove("a.mp4").unwrap());
        assert!(favorites.load().is_empty());
    }
}
