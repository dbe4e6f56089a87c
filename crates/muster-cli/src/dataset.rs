//! Folder layout for bulk enrollment.
//!
//! ```text
//! dataset/
//!   U001_Ada Lovelace/   -> external_id "U001", name "Ada Lovelace"
//!     a.jpg
//!     b.png
//!   U002/                -> external_id "U002", no name
//!     face.jpeg
//! ```

use std::io;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// One person folder with its candidate images in name order.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonDir {
    pub folder: String,
    pub external_id: String,
    pub name: Option<String>,
    pub images: Vec<PathBuf>,
}

/// Split `ID_Name` at the first underscore.
pub fn parse_folder_name(folder: &str) -> (String, Option<String>) {
    match folder.split_once('_') {
        Some((id, name)) if !name.is_empty() => (id.to_string(), Some(name.to_string())),
        Some((id, _)) => (id.to_string(), None),
        None => (folder.to_string(), None),
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// List person folders under `root`, sorted by folder name. Plain files at
/// the top level are ignored.
pub fn scan(root: &Path) -> io::Result<Vec<PersonDir>> {
    let mut people = Vec::new();

    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let folder = entry.file_name().to_string_lossy().into_owned();
        let (external_id, name) = parse_folder_name(&folder);

        let mut images: Vec<PathBuf> = std::fs::read_dir(entry.path())?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_image(p))
            .collect();
        images.sort();

        people.push(PersonDir {
            folder,
            external_id,
            name,
            images,
        });
    }

    people.sort_by(|a, b| a.folder.cmp(&b.folder));
    Ok(people)
}
