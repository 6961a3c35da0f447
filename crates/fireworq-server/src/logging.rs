//! An error-log writer that can be re-pointed at its configured path on
//! demand, mirroring a `Writer.Reopen` contract driven by a `SIGUSR1`
//! handler. Does not rotate by size or time itself; it only lets an
//! external tool (`logrotate`) move the file out from under us and
//! have the next write land in a fresh one.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone)]
pub struct ReopenableWriter {
    path: Option<String>,
    file: Arc<Mutex<Option<File>>>,
}

impl ReopenableWriter {
    /// An empty path means "no file configured"; writes fall through to
    /// stderr, matching the Go daemon's stdio-by-default behavior.
    pub fn open(path: &str) -> io::Result<Self> {
        if path.is_empty() {
            return Ok(ReopenableWriter { path: None, file: Arc::new(Mutex::new(None)) });
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(ReopenableWriter { path: Some(path.to_string()), file: Arc::new(Mutex::new(Some(file))) })
    }

    pub fn reopen(&self) -> io::Result<()> {
        let Some(path) = &self.path else { return Ok(()) };
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        *self.file.lock().unwrap() = Some(file);
        Ok(())
    }
}

impl Write for ReopenableWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.lock().unwrap().as_mut() {
            Some(file) => file.write(buf),
            None => io::stderr().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.lock().unwrap().as_mut() {
            Some(file) => file.flush(),
            None => io::stderr().flush(),
        }
    }
}

impl<'a> MakeWriter<'a> for ReopenableWriter {
    type Writer = ReopenableWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn falls_through_to_stderr_with_no_path() {
        let mut writer = ReopenableWriter::open("").unwrap();
        assert_eq!(writer.write(b"x").unwrap(), 1);
    }

    #[test]
    fn writes_and_reopens_the_configured_file() {
        let dir = std::env::temp_dir().join(format!("fireworq-log-test-{}", std::process::id()));
        let mut writer = ReopenableWriter::open(dir.to_str().unwrap()).unwrap();
        writer.write_all(b"one\n").unwrap();
        writer.flush().unwrap();

        std::fs::rename(&dir, dir.with_extension("rotated")).unwrap();
        writer.reopen().unwrap();
        writer.write_all(b"two\n").unwrap();
        writer.flush().unwrap();

        let mut contents = String::new();
        File::open(&dir).unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "two\n");

        std::fs::remove_file(&dir).ok();
        std::fs::remove_file(dir.with_extension("rotated")).ok();
    }
}
