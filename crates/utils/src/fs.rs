//! Small filesystem helpers shared by the sysfs readers and the checkpoint store.

use std::fs;
use std::io;
use std::io::Write;
use std::path::Path;

/// Read a whole file and strip surrounding whitespace, the usual shape of sysfs
/// attribute files.
pub fn read_trimmed<P: AsRef<Path>>(path: P) -> io::Result<String> {
    fs::read_to_string(path).map(|s| s.trim().to_string())
}

/// Replace `path` with `data` so that readers observe either the previous or
/// the new content, never a partial write.
///
/// The data is written to a sibling temporary file, synced, and renamed over
/// the destination.
pub fn write_atomic<P: AsRef<Path>>(path: P, data: &[u8]) -> io::Result<()> {
    let path = path.as_ref();
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;

    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    Ok(())
}
