//! Directory ⇄ tar stream
//!
//! Entries are stored under their path relative to the archived root, in
//! sorted walk order with deterministic headers, so archiving the same tree
//! twice produces the same bytes (and therefore the same checksum).

use std::io::Cursor;
use std::path::Path;

use tar::{Archive, Builder, HeaderMode};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{ChunkError, ChunkResult};

/// Archive every directory and regular file under `root` into a tar stream.
pub fn archive_dir(root: &Path) -> ChunkResult<Vec<u8>> {
    let mut builder = Builder::new(Vec::new());
    builder.mode(HeaderMode::Deterministic);
    builder.follow_symlinks(false);

    let mut entries = 0usize;
    for entry in WalkDir::new(root).sort_by_file_name().min_depth(1) {
        let entry = entry.map_err(|e| ChunkError::Archive(format!("walking {}: {e}", root.display())))?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| ChunkError::Archive(e.to_string()))?;

        let file_type = entry.file_type();
        if file_type.is_dir() {
            builder.append_dir(rel, entry.path())?;
        } else if file_type.is_file() {
            builder.append_path_with_name(entry.path(), rel)?;
        } else {
            debug!(path = %entry.path().display(), "skipping non-regular entry");
            continue;
        }
        entries += 1;
    }

    let data = builder.into_inner()?;
    debug!(root = %root.display(), entries, bytes = data.len(), "archived directory");
    Ok(data)
}

/// Unpack a stream produced by [`archive_dir`] into `dest`.
pub fn unpack_archive(data: &[u8], dest: &Path) -> ChunkResult<()> {
    std::fs::create_dir_all(dest)?;
    Archive::new(Cursor::new(data))
        .unpack(dest)
        .map_err(|e| ChunkError::Archive(format!("unpacking into {}: {e}", dest.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn populate(root: &Path) {
        std::fs::create_dir_all(root.join("docs/nested")).unwrap();
        std::fs::write(root.join("top.txt"), b"top level").unwrap();
        std::fs::write(root.join("docs/readme.md"), b"# readme").unwrap();
        std::fs::write(root.join("docs/nested/deep.bin"), [0u8, 1, 2, 3]).unwrap();
        std::fs::create_dir_all(root.join("empty")).unwrap();
    }

    #[test]
    fn archive_roundtrip_preserves_relative_paths() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        populate(src.path());

        let tar = archive_dir(src.path()).unwrap();
        unpack_archive(&tar, dst.path()).unwrap();

        assert_eq!(std::fs::read(dst.path().join("top.txt")).unwrap(), b"top level");
        assert_eq!(
            std::fs::read(dst.path().join("docs/readme.md")).unwrap(),
            b"# readme"
        );
        assert_eq!(
            std::fs::read(dst.path().join("docs/nested/deep.bin")).unwrap(),
            [0u8, 1, 2, 3]
        );
        assert!(dst.path().join("empty").is_dir());
    }

    #[test]
    fn archiving_is_deterministic() {
        let src = TempDir::new().unwrap();
        populate(src.path());

        let a = archive_dir(src.path()).unwrap();
        let b = archive_dir(src.path()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unpack_garbage_fails() {
        let dst = TempDir::new().unwrap();
        let garbage = vec![0xFFu8; 1024];
        assert!(unpack_archive(&garbage, dst.path()).is_err());
    }
}
