use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use crate::models::job::JobId;

pub fn log_path(jobs_dir: &Path, id: &JobId) -> PathBuf {
    jobs_dir.join(format!("{}.log", id))
}

/// Append-only writer for one job's sanitized output.
#[derive(Debug)]
pub struct JobLog {
    file: File,
}

impl JobLog {
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }

    pub fn append(&mut self, text: &str) -> io::Result<()> {
        self.file.write_all(text.as_bytes())?;
        self.file.flush()
    }

    pub fn close(self) -> io::Result<()> {
        self.file.sync_all()
    }
}

/// Reads a log; a log that was never created reads as empty.
pub fn read_log(path: &Path) -> io::Result<String> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(err),
    }
}

pub fn remove_log(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_accumulate_and_missing_logs_read_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_path(&dir.path().join("jobs"), &JobId::from("job-a"));
        assert_eq!(read_log(&path).unwrap(), "");

        let mut log = JobLog::create(&path).unwrap();
        log.append("one\n").unwrap();
        log.append("two\n").unwrap();
        log.close().unwrap();
        assert_eq!(read_log(&path).unwrap(), "one\ntwo\n");

        remove_log(&path).unwrap();
        remove_log(&path).unwrap();
        assert!(!path.exists());
    }
}
