// Local music library - turns a directory of audio files into media for the system playlist

use crate::model::{Media, MediaUser, SystemUser};
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

const SUPPORTED_EXTENSIONS: [&str; 8] = ["mp3", "flac", "ogg", "oga", "mp4", "m4a", "aac", "wav"];

// tried in order when splitting "Artist - Title"
const DELIMITERS: [&str; 3] = [" - ", " – ", " — "];

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Best guess at (title, artist) from a file stem like "Artist - Title"
pub fn parse_file_stem(stem: &str) -> (String, String) {
    let stem = stem.replace('_', " ");
    let stem = stem.trim();
    for delimiter in DELIMITERS {
        if let Some((artist, title)) = stem.split_once(delimiter) {
            let (artist, title) = (artist.trim(), title.trim());
            if !artist.is_empty() && !title.is_empty() {
                return (title.to_string(), artist.to_string());
            }
        }
    }
    (stem.to_string(), String::new())
}

/// Every supported, non-hidden, non-empty audio file under `dir`, sorted by path
pub fn scan_directory(dir: &Path) -> Vec<Media> {
    let mut files: Vec<_> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.starts_with('.'));
            let empty = path.metadata().map_or(true, |m| m.len() == 0);
            !hidden && !empty && is_supported(path)
        })
        .collect();
    files.sort();

    let owner = MediaUser::System(SystemUser {
        name: "library".to_string(),
    });
    let medias: Vec<Media> = files
        .into_iter()
        .map(|path| {
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            let (title, artist) = parse_file_stem(stem);
            debug!("Found '{}' at {}", title, path.display());
            Media::new(title, artist, path.to_string_lossy()).with_user(owner.clone())
        })
        .collect();
    info!("Scanned {} tracks under {}", medias.len(), dir.display());
    medias
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_file_stem() {
        assert_eq!(
            parse_file_stem("Porter Robinson - Shelter"),
            ("Shelter".to_string(), "Porter Robinson".to_string())
        );
        assert_eq!(
            parse_file_stem("Madeon_-_Imperium"),
            ("Imperium".to_string(), "Madeon".to_string())
        );
        assert_eq!(parse_file_stem("untitled track"), ("untitled track".to_string(), String::new()));
        assert_eq!(parse_file_stem(" - Lonely"), ("- Lonely".to_string(), String::new()));
    }

    #[test]
    fn test_scan_directory_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("b").join("Artist - Second.MP3"), b"data").unwrap();
        fs::write(dir.path().join("a - First.flac"), b"data").unwrap();
        fs::write(dir.path().join("notes.txt"), b"data").unwrap();
        fs::write(dir.path().join(".hidden.mp3"), b"data").unwrap();
        fs::write(dir.path().join("empty.mp3"), b"").unwrap();

        let medias = scan_directory(dir.path());
        let titles: Vec<&str> = medias.iter().map(|m| m.title.as_str()).collect();
        assert_eq!(titles, vec!["First", "Second"]);
        assert_eq!(medias[1].artist, "Artist");
        assert_eq!(medias[0].user_name(), "library");
        assert!(medias[0].url.ends_with("a - First.flac"));
    }
}
