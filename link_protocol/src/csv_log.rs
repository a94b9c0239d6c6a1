// Append-only CSV files with a header written when the file is created.
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};

use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
};

#[derive(Debug, Clone)]
pub struct CsvLog {
    path: PathBuf,
    header: &'static str,
}

impl CsvLog {
    pub fn new(path: impl Into<PathBuf>, header: &'static str) -> Self {
        Self {
            path: path.into(),
            header,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row. The header goes in first if the file does not exist
    /// yet, so a log removed while running is re-headered on the next row.
    pub async fn append(&self, row: &str) -> io::Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).await?;
            }
        }
        let fresh = !fs::try_exists(&self.path).await.unwrap_or(false);
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        let mut out = String::with_capacity(self.header.len() + row.len() + 2);
        if fresh {
            out.push_str(self.header);
            out.push('\n');
        }
        out.push_str(row);
        out.push('\n');
        f.write_all(out.as_bytes()).await?;
        f.flush().await
    }

    /// Last `n` data rows, oldest first; the header line is skipped. The
    /// file is streamed, only `n` rows are held at a time.
    pub async fn tail(&self, n: usize) -> io::Result<Vec<String>> {
        let mut lines = BufReader::new(File::open(&self.path).await?).lines();
        let mut last = VecDeque::with_capacity(n);

        // header
        if lines.next_line().await?.is_none() {
            return Ok(Vec::new());
        }
        while let Some(line) = lines.next_line().await? {
            if n == 0 || line.trim().is_empty() {
                continue;
            }
            if last.len() == n {
                last.pop_front();
            }
            last.push_back(line);
        }
        Ok(last.into())
    }
}
