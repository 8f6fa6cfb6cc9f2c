//! Atomic file writes for the TFTP root and Pi node trees (spec.md §5:
//! "Writes must be atomic per file").

use std::io::Write;
use std::path::Path;

/// Write `content` to `path` atomically: the data lands in a sibling temp
/// file in the same directory first, then `rename` swaps it into place.
/// A concurrent TFTP read of `path`, or a crash mid-write, never observes a
/// truncated or partial file.
pub(crate) fn atomic_write(path: &Path, content: impl AsRef<[u8]>) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path.file_name().and_then(|name| name.to_str()).unwrap_or("file");
    let temp_path = parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    let mut file = std::fs::File::create(&temp_path)?;
    file.write_all(content.as_ref())?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&temp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_content_and_leaves_no_temp_file_behind() {
        let dir = std::env::temp_dir().join(format!("pureboot-fs-util-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create scratch dir");
        let target = dir.join("autoexec.ipxe");

        atomic_write(&target, b"hello").expect("atomic write");
        assert_eq!(std::fs::read(&target).expect("read"), b"hello");

        let leftovers: Vec<_> = std::fs::read_dir(&dir)
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "no temp file should survive a successful write");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn overwrites_existing_file_in_place() {
        let dir = std::env::temp_dir().join(format!("pureboot-fs-util-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create scratch dir");
        let target = dir.join("config.txt");

        atomic_write(&target, b"first").expect("first write");
        atomic_write(&target, b"second").expect("second write");
        assert_eq!(std::fs::read(&target).expect("read"), b"second");

        std::fs::remove_dir_all(&dir).ok();
    }
}
