use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::Utc;

use crate::error::Result;
use crate::run::Run;

/// One JSON object per run, one run per line, in the order given.
pub fn write_jsonl<W: Write>(mut writer: W, runs: &[Run]) -> Result<()> {
    for run in runs {
        serde_json::to_writer(&mut writer, run)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes the report next to its final path and renames it into place, so
/// readers never observe a half-written file.
pub fn write_jsonl_file(path: &Path, runs: &[Run]) -> Result<()> {
    let mut bytes = Vec::new();
    write_jsonl(&mut bytes, runs)?;
    atomic_write_bytes(path, &bytes)
}

fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("report");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}
