//! Local file helpers shared by the export mirror and the upload copy.

use std::path::{Path, PathBuf};

use anyhow::Context;
use folio_core::Record;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use uuid::Uuid;

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// First six hex characters of the SHA-256 of `input`.
pub fn short_hash(input: &str) -> String {
    let mut hash = sha256_hex(input.as_bytes());
    hash.truncate(6);
    hash
}

/// Replaces every character outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// `report.pdf` becomes `report-<hash>.pdf`, hashing the source path so reruns pick the same name.
pub fn collision_filename(filename: &str, source_path: &str) -> String {
    let path = Path::new(filename);
    let hash = short_hash(source_path);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string());
    match path.extension() {
        Some(ext) => format!("{stem}-{hash}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{hash}"),
    }
}

/// Every regular file under `root`, relative to it, in sorted order. A missing root yields nothing.
pub async fn walk_files(root: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if !fs::try_exists(root)
        .await
        .with_context(|| format!("checking {}", root.display()))?
    {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let mut pending = vec![PathBuf::new()];
    while let Some(rel_dir) = pending.pop() {
        let abs_dir = root.join(&rel_dir);
        let mut entries = fs::read_dir(&abs_dir)
            .await
            .with_context(|| format!("reading directory {}", abs_dir.display()))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("reading directory {}", abs_dir.display()))?
        {
            let rel = rel_dir.join(entry.file_name());
            let file_type = entry
                .file_type()
                .await
                .with_context(|| format!("inspecting {}", entry.path().display()))?;
            if file_type.is_dir() {
                pending.push(rel);
            } else {
                files.push(rel);
            }
        }
    }
    files.sort();
    Ok(files)
}

pub async fn count_files(root: &Path) -> anyhow::Result<u64> {
    Ok(walk_files(root).await?.len() as u64)
}

/// Writes through a temp file and renames it into place, so a failed download never leaves a partial file.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("creating directory {}", parent.display()))?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let result: anyhow::Result<()> = async {
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
        drop(file);
        fs::rename(&temp_path, path).await.with_context(|| {
            format!(
                "renaming temp file {} -> {}",
                temp_path.display(),
                path.display()
            )
        })
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&temp_path).await;
    }
    result
}

/// Newline-delimited JSON output, one record per line.
#[derive(Debug)]
pub struct JsonlWriter {
    path: PathBuf,
    writer: BufWriter<fs::File>,
    lines: u64,
}

impl JsonlWriter {
    /// Creates (or empties) the file at `path`, creating missing parent directories.
    pub async fn create(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        let file = fs::File::create(&path)
            .await
            .with_context(|| format!("creating {}", path.display()))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            lines: 0,
        })
    }

    pub async fn write_record(&mut self, record: &Record) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(record).context("serializing record")?;
        line.push(b'\n');
        self.writer
            .write_all(&line)
            .await
            .with_context(|| format!("writing {}", self.path.display()))?;
        self.lines += 1;
        Ok(())
    }

    pub fn lines(&self) -> u64 {
        self.lines
    }

    pub async fn finish(mut self) -> anyhow::Result<u64> {
        self.writer
            .flush()
            .await
            .with_context(|| format!("flushing {}", self.path.display()))?;
        Ok(self.lines)
    }

    /// Drops anything written so far and leaves an empty file behind.
    pub async fn truncate(self) -> anyhow::Result<()> {
        let file = self.writer.into_inner();
        file.set_len(0)
            .await
            .with_context(|| format!("truncating {}", self.path.display()))
    }
}

/// One non-blank line of an export file.
#[derive(Debug)]
pub struct JsonlLine {
    pub index: usize,
    pub record: Result<Record, String>,
}

pub async fn read_jsonl(path: &Path) -> anyhow::Result<Vec<JsonlLine>> {
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(index, line)| JsonlLine {
            index,
            record: match serde_json::from_str::<serde_json::Value>(line) {
                Ok(serde_json::Value::Object(map)) => Ok(map),
                Ok(_) => Err(format!("line {} is not a JSON object", index + 1)),
                Err(e) => Err(format!("line {}: {e}", index + 1)),
            },
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn hashing_is_stable() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(short_hash("hello world"), "b94d27");
    }

    #[test]
    fn sanitizes_everything_outside_the_safe_set() {
        assert_eq!(sanitize_filename("My CV (2024).pdf"), "My_CV__2024_.pdf");
        assert_eq!(sanitize_filename("résumé.pdf"), "r_sum_.pdf");
        assert_eq!(sanitize_filename("../etc/passwd"), ".._etc_passwd");
        assert_eq!(sanitize_filename("plain-name_1.txt"), "plain-name_1.txt");
    }

    #[test]
    fn collision_names_keep_extension_and_are_deterministic() {
        let a = collision_filename("My_CV.pdf", "cv-files/My CV.pdf");
        let b = collision_filename("My_CV.pdf", "cv-files/My CV.pdf");
        assert_eq!(a, b);
        assert!(a.starts_with("My_CV-"));
        assert!(a.ends_with(".pdf"));
        assert_eq!(a.len(), "My_CV-".len() + 6 + ".pdf".len());
        assert_ne!(a, collision_filename("My_CV.pdf", "cv-files/My?CV.pdf"));
        assert_eq!(collision_filename("README", "x").len(), "README-".len() + 6);
    }

    #[tokio::test]
    async fn walks_nested_files_and_tolerates_missing_root() {
        let dir = tempdir().expect("tempdir");
        assert_eq!(count_files(&dir.path().join("absent")).await.unwrap(), 0);

        write_atomic(&dir.path().join("cv-files/a.pdf"), b"a").await.unwrap();
        write_atomic(&dir.path().join("cv-files/old/b.pdf"), b"b").await.unwrap();
        write_atomic(&dir.path().join("images/c.png"), b"c").await.unwrap();

        let files = walk_files(dir.path()).await.unwrap();
        assert_eq!(
            files,
            vec![
                PathBuf::from("cv-files/a.pdf"),
                PathBuf::from("cv-files/old/b.pdf"),
                PathBuf::from("images/c.png"),
            ]
        );
        assert_eq!(count_files(dir.path()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn jsonl_writer_and_reader_agree() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("portfolio_projects.jsonl");
        let mut writer = JsonlWriter::create(&path).await.unwrap();
        for value in [json!({"id": 1, "tags": ["rust"]}), json!({"id": 2, "tags": null})] {
            let serde_json::Value::Object(record) = value else { unreachable!() };
            writer.write_record(&record).await.unwrap();
        }
        assert_eq!(writer.finish().await.unwrap(), 2);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "{\"id\":1,\"tags\":[\"rust\"]}\n{\"id\":2,\"tags\":null}\n");

        std::fs::write(&path, format!("{text}\n[1,2]\nnot json\n")).unwrap();
        let lines = read_jsonl(&path).await.unwrap();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].record.is_ok());
        assert!(lines[2].record.as_ref().unwrap_err().contains("not a JSON object"));
        assert!(lines[3].record.is_err());
    }

    #[tokio::test]
    async fn jsonl_writer_creates_missing_directories() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("migrations/export/cv_downloads.jsonl");
        let mut writer = JsonlWriter::create(&path).await.unwrap();
        writer
            .write_record(json!({"id": 1}).as_object().unwrap())
            .await
            .unwrap();
        assert_eq!(writer.finish().await.unwrap(), 1);
        assert_eq!(read_jsonl(&path).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn truncate_leaves_empty_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("t.jsonl");
        let mut writer = JsonlWriter::create(&path).await.unwrap();
        let mut record = Record::new();
        record.insert("id".into(), json!(1));
        writer.write_record(&record).await.unwrap();
        writer.truncate().await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap().len(), 0);
    }
}
