// tally-store/src/fs.rs
//
// Filesystem capability consumed by the store. Production code uses `OsFs`;
// tests wrap it to inject faults.

use std::{fs, io, path::Path};

pub trait FileSystem: Send + Sync {
    fn exists(&self, path: &Path) -> bool;
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    fn read_to_string(&self, path: &Path) -> io::Result<String>;
    fn write(&self, path: &Path, contents: &str) -> io::Result<()>;
    /// File names (not paths) of regular entries in `dir`, unordered.
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<String>>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct OsFs;

impl FileSystem for OsFs {
    fn exists(&self, path: &Path) -> bool { path.exists() }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> { fs::create_dir_all(path) }

    fn read_to_string(&self, path: &Path) -> io::Result<String> { fs::read_to_string(path) }

    fn write(&self, path: &Path, contents: &str) -> io::Result<()> { fs::write(path, contents) }

    fn list_dir(&self, dir: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() { continue; }
            if let Some(name) = entry.file_name().to_str() { names.push(name.to_string()); }
        }
        Ok(names)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> { fs::remove_file(path) }
}
