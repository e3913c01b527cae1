//! Size-bounded file writer with a fixed number of rotated generations.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Append-only file writer that rotates when the current file would exceed
/// `max_file_size`.
///
/// The live file is `<dir>/<base_name>`; rotated generations are
/// `<base_name>.1` (newest) through `<base_name>.<max_rotations>` (oldest).
/// With `max_rotations == 0` the live file is simply truncated on rotation.
/// A `max_file_size` of 0 disables rotation.
#[derive(Debug)]
pub struct RotatingFileWriter {
    dir: PathBuf,
    base_name: String,
    max_rotations: usize,
    max_file_size: u64,
    file: Option<File>,
    current_size: u64,
}

impl RotatingFileWriter {
    pub fn new(
        dir: impl Into<PathBuf>,
        base_name: &str,
        max_rotations: usize,
        max_file_size: u64,
    ) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let mut writer = Self {
            dir,
            base_name: sanitize_name(base_name),
            max_rotations,
            max_file_size,
            file: None,
            current_size: 0,
        };
        let (file, size) = writer.open_current_file()?;
        writer.file = Some(file);
        writer.current_size = size;
        if writer.max_file_size > 0 && writer.current_size > writer.max_file_size {
            writer.rotate()?;
        }
        Ok(writer)
    }

    /// Path of the live file.
    pub fn current_path(&self) -> PathBuf {
        self.dir.join(&self.base_name)
    }

    /// Path of the `index`-th rotated generation (1 is the newest).
    pub fn rotated_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}.{}", self.base_name, index))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Bytes currently in the live file.
    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    fn open_current_file(&self) -> io::Result<(File, u64)> {
        let path = self.current_path();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata()?.len();
        Ok((file, size))
    }

    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }

        self.rotate_files()?;

        let (file, size) = self.open_current_file()?;
        self.file = Some(file);
        self.current_size = size;
        Ok(())
    }

    fn rotate_files(&self) -> io::Result<()> {
        let current = self.current_path();
        if self.max_rotations == 0 {
            if current.exists() {
                fs::remove_file(&current)?;
            }
            return Ok(());
        }

        let oldest = self.rotated_path(self.max_rotations);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }

        for idx in (1..self.max_rotations).rev() {
            let src = self.rotated_path(idx);
            if src.exists() {
                fs::rename(&src, self.rotated_path(idx + 1))?;
            }
        }

        if current.exists() {
            fs::rename(current, self.rotated_path(1))?;
        }

        Ok(())
    }
}

impl Write for RotatingFileWriter {
    /// Writes the whole buffer as one record; a record never straddles two files.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.max_file_size > 0
            && self.current_size > 0
            && self.current_size + buf.len() as u64 > self.max_file_size
        {
            self.rotate()?;
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file unavailable"))?;
        file.write_all(buf)?;
        self.current_size += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

impl Drop for RotatingFileWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_writes_to_current_file() {
        let tmp = TempDir::new().unwrap();
        let mut writer = RotatingFileWriter::new(tmp.path(), "s1.event.log", 1, 1024).unwrap();

        writer.write_all(b"hello\n").unwrap();
        writer.flush().unwrap();

        let contents = fs::read_to_string(tmp.path().join("s1.event.log")).unwrap();
        assert_eq!(contents, "hello\n");
        assert_eq!(writer.current_size(), 6);
    }

    #[test]
    fn test_rotation_keeps_bounded_generations() {
        let tmp = TempDir::new().unwrap();
        let mut writer = RotatingFileWriter::new(tmp.path(), "app.log", 2, 10).unwrap();

        for line in ["aaaaaaaa\n", "bbbbbbbb\n", "cccccccc\n", "dddddddd\n"] {
            writer.write_all(line.as_bytes()).unwrap();
        }
        writer.flush().unwrap();

        let read = |name: &str| fs::read_to_string(tmp.path().join(name)).unwrap();
        assert_eq!(read("app.log"), "dddddddd\n");
        assert_eq!(read("app.log.1"), "cccccccc\n");
        assert_eq!(read("app.log.2"), "bbbbbbbb\n");
        assert!(!tmp.path().join("app.log.3").exists());
    }

    #[test]
    fn test_zero_rotations_truncates() {
        let tmp = TempDir::new().unwrap();
        let mut writer = RotatingFileWriter::new(tmp.path(), "app.log", 0, 8).unwrap();

        writer.write_all(b"1234567\n").unwrap();
        writer.write_all(b"abc\n").unwrap();
        writer.flush().unwrap();

        assert_eq!(fs::read_to_string(tmp.path().join("app.log")).unwrap(), "abc\n");
        assert!(!tmp.path().join("app.log.1").exists());
    }

    #[test]
    fn test_oversized_record_is_not_split() {
        let tmp = TempDir::new().unwrap();
        let mut writer = RotatingFileWriter::new(tmp.path(), "app.log", 1, 4).unwrap();

        writer.write_all(b"0123456789\n").unwrap();
        writer.flush().unwrap();

        assert_eq!(
            fs::read_to_string(tmp.path().join("app.log")).unwrap(),
            "0123456789\n"
        );
    }

    #[test]
    fn test_reopen_appends_existing_file() {
        let tmp = TempDir::new().unwrap();
        {
            let mut writer = RotatingFileWriter::new(tmp.path(), "app.log", 1, 1024).unwrap();
            writer.write_all(b"one\n").unwrap();
        }
        let mut writer = RotatingFileWriter::new(tmp.path(), "app.log", 1, 1024).unwrap();
        assert_eq!(writer.current_size(), 4);
        writer.write_all(b"two\n").unwrap();
        writer.flush().unwrap();

        assert_eq!(
            fs::read_to_string(tmp.path().join("app.log")).unwrap(),
            "one\ntwo\n"
        );
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("s1.trackscout.event.log"), "s1.trackscout.event.log");
        assert_eq!(sanitize_name("a/b c"), "a_b_c");
    }
}
