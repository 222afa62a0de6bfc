use anyhow::{anyhow, Context, Result};
use serde_json::json;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::engine::SequenceResult;

/// On-disk format for a persisted run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultFormat {
    Json,
    Csv,
}

impl ResultFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ResultFormat::Json => "json",
            ResultFormat::Csv => "csv",
        }
    }
}

impl std::str::FromStr for ResultFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ResultFormat::Json),
            "csv" => Ok(ResultFormat::Csv),
            other => Err(anyhow!("Unknown result format: {other} (expected json or csv)")),
        }
    }
}

/// Aggregate statistics over the results held in memory.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub total_duration: f64,
    pub average_duration: f64,
}

/// Persists finished [`SequenceResult`]s, one file per run, named
/// `<sequence>_<YYYYmmdd_HHMMSS>.<ext>`.
pub struct ResultsStore {
    dir: PathBuf,
    results: Vec<SequenceResult>,
}

impl ResultsStore {
    /// Default location under the user's home directory.
    pub fn default_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir()
            .context("Failed to resolve home directory")?
            .join(".benchlink")
            .join("results"))
    }

    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        Ok(Self {
            dir,
            results: Vec::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Track a result in memory for [`summary`](Self::summary).
    pub fn add(&mut self, result: SequenceResult) {
        self.results.push(result);
    }

    pub fn save(&self, result: &SequenceResult, format: ResultFormat) -> Result<PathBuf> {
        let stamp = result.start_time.format("%Y%m%d_%H%M%S");
        let path = self.dir.join(format!(
            "{}_{stamp}.{}",
            result.sequence_name,
            format.extension()
        ));
        match format {
            ResultFormat::Json => self.save_json(result, &path)?,
            ResultFormat::Csv => self.save_csv(result, &path)?,
        }
        log::info!("Saved result to {}", path.display());
        Ok(path)
    }

    fn save_json(&self, result: &SequenceResult, path: &Path) -> Result<()> {
        let steps: Vec<serde_json::Value> = result
            .step_results
            .iter()
            .map(|step| {
                json!({
                    "type": step.step.kind(),
                    "params": step.step.params(),
                    "success": step.success,
                    "message": step.message,
                    "duration": step.duration,
                    "timestamp": step.timestamp.to_rfc3339(),
                    "data": step.data,
                })
            })
            .collect();

        let payload = json!({
            "sequence_name": result.sequence_name,
            "status": result.status.to_string(),
            "start_time": result.start_time.to_rfc3339(),
            "end_time": result.end_time.map(|t| t.to_rfc3339()),
            "total_duration": result.total_duration,
            "pass_count": result.pass_count,
            "fail_count": result.fail_count,
            "error_message": result.error_message,
            "steps": steps,
        });

        fs::write(path, serde_json::to_string_pretty(&payload)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    fn save_csv(&self, result: &SequenceResult, path: &Path) -> Result<()> {
        let mut out = String::new();
        out.push_str("Sequence Result\n");
        out.push_str(&format!(
            "Sequence Name,{}\n",
            csv_field(&result.sequence_name)
        ));
        out.push_str(&format!("Status,{}\n", result.status));
        out.push_str(&format!("Start Time,{}\n", result.start_time.to_rfc3339()));
        out.push_str(&format!(
            "End Time,{}\n",
            result
                .end_time
                .map(|t| t.to_rfc3339())
                .unwrap_or_default()
        ));
        out.push_str(&format!("Total Duration,{:.3}s\n", result.total_duration));
        out.push_str(&format!("Pass Count,{}\n", result.pass_count));
        out.push_str(&format!("Fail Count,{}\n", result.fail_count));
        out.push_str(&format!(
            "Error Message,{}\n",
            csv_field(&result.error_message)
        ));
        out.push('\n');

        out.push_str("Steps\n");
        out.push_str("Index,Type,Success,Message,Duration (s),Timestamp\n");
        for (i, step) in result.step_results.iter().enumerate() {
            out.push_str(&format!(
                "{},{},{},{},{:.3},{}\n",
                i + 1,
                step.step.kind(),
                if step.success { "PASS" } else { "FAIL" },
                csv_field(&step.message),
                step.duration,
                step.timestamp.to_rfc3339(),
            ));
        }

        fs::write(path, out).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Result files on disk, most recent first.
    pub fn list(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| {
                        p.extension()
                            .is_some_and(|ext| ext == "json" || ext == "csv")
                    })
                    .collect()
            })
            .unwrap_or_default();
        files.sort();
        files.reverse();
        files
    }

    pub fn summary(&self) -> RunSummary {
        let total = self.results.len();
        let passed = self.results.iter().filter(|r| r.is_passed()).count();
        let total_duration: f64 = self.results.iter().map(|r| r.total_duration).sum();
        RunSummary {
            total,
            passed,
            failed: total - passed,
            total_duration,
            average_duration: if total > 0 {
                total_duration / total as f64
            } else {
                0.0
            },
        }
    }
}

/// Quote a CSV field when it contains a delimiter, quote or newline.
fn csv_field(text: &str) -> String {
    if text.contains(',') || text.contains('"') || text.contains('\n') {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ExecutionStatus, StepResult};
    use crate::sequence::Step;
    use chrono::Local;

    fn sample_result() -> SequenceResult {
        let now = Local::now();
        SequenceResult {
            sequence_name: "smoke".to_string(),
            status: ExecutionStatus::Completed,
            start_time: now,
            end_time: Some(now),
            step_results: vec![StepResult {
                step: Step::Task {
                    number: 2,
                    description: None,
                },
                success: true,
                message: "OK, with a comma".to_string(),
                duration: 0.125,
                timestamp: now,
                data: serde_json::Map::new(),
            }],
            total_duration: 0.125,
            pass_count: 1,
            fail_count: 0,
            error_message: String::new(),
        }
    }

    #[test]
    fn test_save_json_shape() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ResultsStore::open(tmp.path()).unwrap();

        let path = store.save(&sample_result(), ResultFormat::Json).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();

        assert_eq!(value["sequence_name"], "smoke");
        assert_eq!(value["status"], "completed");
        assert_eq!(value["pass_count"], 1);
        let steps = value["steps"].as_array().unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0]["type"], "task");
        assert_eq!(steps[0]["params"]["number"], 2);
        assert!(steps[0]["params"].get("type").is_none());
    }

    #[test]
    fn test_save_csv_quotes_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ResultsStore::open(tmp.path()).unwrap();

        let path = store.save(&sample_result(), ResultFormat::Csv).unwrap();
        let text = fs::read_to_string(&path).unwrap();

        assert!(text.starts_with("Sequence Result\n"));
        assert!(text.contains("Index,Type,Success,Message,Duration (s),Timestamp"));
        assert!(text.contains("1,task,PASS,\"OK, with a comma\",0.125,"));
    }

    #[test]
    fn test_list_newest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ResultsStore::open(tmp.path()).unwrap();
        fs::write(tmp.path().join("a_20240101_000000.json"), "{}").unwrap();
        fs::write(tmp.path().join("a_20250101_000000.json"), "{}").unwrap();
        fs::write(tmp.path().join("notes.txt"), "ignored").unwrap();

        let files = store.list();
        assert_eq!(files.len(), 2);
        assert!(files[0].to_string_lossy().contains("2025"));
    }

    #[test]
    fn test_summary_counts() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = ResultsStore::open(tmp.path()).unwrap();
        assert_eq!(store.summary().total, 0);

        let passed = sample_result();
        let mut failed = sample_result();
        failed.status = ExecutionStatus::Failed;
        failed.fail_count = 1;

        store.add(passed);
        store.add(failed);

        let summary = store.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert!((summary.average_duration - 0.125).abs() < 1e-9);
    }

    #[test]
    fn test_result_format_parse() {
        assert_eq!("json".parse::<ResultFormat>().unwrap(), ResultFormat::Json);
        assert_eq!("CSV".parse::<ResultFormat>().unwrap(), ResultFormat::Csv);
        assert!("xml".parse::<ResultFormat>().is_err());
    }
}
