use std::fs::{File as StdFile, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use scopeguard::guard;
use tokio::task;
use tracing::warn;

use crate::models::CheckRecord;

pub(crate) async fn append_check_record(path: &Path, record: &CheckRecord) -> Result<()> {
    let path = path.to_path_buf();
    let record = record.clone();

    task::spawn_blocking(move || -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut file = std::io::BufWriter::new(file);
        serde_json::to_writer(&mut file, &record)?;
        file.write_all(b"\n")?;
        file.flush()?;
        Ok(())
    })
    .await??;
    Ok(())
}

pub(crate) async fn load_check_records(
    path: &Path,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
) -> Result<Vec<CheckRecord>> {
    let path = path.to_path_buf();

    task::spawn_blocking(move || -> Result<Vec<CheckRecord>> {
        let file = match StdFile::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let reader = BufReader::new(file);
        let mut records = Vec::new();

        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CheckRecord>(&line) {
                Ok(record) => {
                    let in_since = since.is_none_or(|s| record.timestamp >= s);
                    let in_until = until.is_none_or(|u| record.timestamp <= u);
                    if in_since && in_until {
                        records.push(record);
                    }
                }
                Err(e) => {
                    if e.is_eof() {
                        break;
                    }
                    warn!(line = lineno + 1, error = %e, "skipping malformed check record");
                }
            }
        }
        Ok(records)
    })
    .await?
}

/// First free name in `dir`: `name` itself, then `stem-1.ext`, `stem-2.ext`, ...
fn unused_report_path(dir: &Path, name: &str) -> PathBuf {
    let target = dir.join(name);
    if !target.exists() {
        return target;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) => (stem, format!(".{}", ext)),
        None => (name, String::new()),
    };
    (1u32..)
        .map(|n| dir.join(format!("{}-{}{}", stem, n, ext)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(target)
}

/// Write `contents` to `dir/name` via a temp file and rename, so readers
/// never see a half-written report. An existing report is never replaced;
/// the new one gets a numbered suffix instead.
pub(crate) async fn write_report_file(dir: &Path, name: &str, contents: String) -> Result<PathBuf> {
    let dir = dir.to_path_buf();
    let name = name.to_string();

    task::spawn_blocking(move || -> Result<PathBuf> {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating report directory {}", dir.display()))?;
        let target = unused_report_path(&dir, &name);
        let tmp_file = dir.join(format!("{}.tmp", name));
        let cleanup = guard(tmp_file.clone(), |path| {
            let _ = std::fs::remove_file(path);
        });
        {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_file)?;
            let mut writer = std::io::BufWriter::new(&file);
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_file, &target)?;
        scopeguard::ScopeGuard::into_inner(cleanup);
        Ok(target)
    })
    .await?
}
