//! Run status file
//!
//! A single JSON object replaced atomically: readers either see the previous
//! record or the new one, never a torn write.

use conduit_core::domain::run::RunStatusRecord;
use std::path::Path;

use crate::error::RunError;

pub async fn write(path: &Path, record: &RunStatusRecord) -> Result<(), RunError> {
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_vec_pretty(record)?;
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

pub async fn read(path: &Path) -> Result<RunStatusRecord, RunError> {
    let body = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_write_replaces_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");

        let mut record = RunStatusRecord {
            run_id: "r1".to_string(),
            tool: "echo".to_string(),
            done: false,
            exit_code: None,
            started_at: Utc::now(),
            finished_at: None,
            terminated: false,
        };
        write(&path, &record).await.unwrap();
        assert!(!read(&path).await.unwrap().done);

        record.done = true;
        record.exit_code = Some(0);
        write(&path, &record).await.unwrap();

        let back = read(&path).await.unwrap();
        assert!(back.done);
        assert_eq!(back.exit_code, Some(0));
        assert!(!dir.path().join("status.json.tmp").exists());
    }
}
