/// Read-only byte view of the input log.
///
/// The log is memory-mapped and handed to the scan workers as one
/// contiguous slice; there is no I/O in the scan loop.  Zero-length
/// files cannot be mapped on every platform, so they degrade to an
/// empty slice.
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use memmap2::Mmap;

#[derive(Debug)]
pub struct LogView {
    map: Option<Mmap>,
    path: PathBuf,
}

impl LogView {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<LogView> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open file at '{}'", path.display()))?;
        let len = file
            .metadata()
            .with_context(|| format!("failed to read file status for '{}'", path.display()))?
            .len();
        let map = if len == 0 {
            None
        } else {
            // Safety: the mapping is private and read-only; a log
            // truncated behind our back while scanning is out of
            // contract for this tool.
            let map = unsafe { Mmap::map(&file) }
                .with_context(|| format!("failed to map '{}' into memory", path.display()))?;
            Some(map)
        };
        Ok(LogView {
            map,
            path: path.to_path_buf(),
        })
    }

    pub fn bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// This tests:
//  - mapping a file yields its contents
//  - an empty file yields an empty view
//  - a missing file is an error naming the path

#[test]
fn test_logview_open() {
    let dir = std::env::temp_dir();
    let path = dir.join("pathlog_logview_test.log");
    std::fs::write(&path, b"a b c\n").unwrap();
    let view = LogView::open(&path).unwrap();
    assert!(view.bytes() == b"a b c\n");
    assert!(view.path() == path);

    let empty = dir.join("pathlog_logview_empty.log");
    std::fs::write(&empty, b"").unwrap();
    let view = LogView::open(&empty).unwrap();
    assert!(view.bytes().is_empty());

    let missing = dir.join("pathlog_logview_missing.log");
    let _ = std::fs::remove_file(&missing);
    let err = LogView::open(&missing).unwrap_err();
    assert!(format!("{:#}", err).contains("pathlog_logview_missing.log"));
}
