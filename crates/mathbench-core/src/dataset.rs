//! Problem and submission file handling.
//!
//! Input problems arrive as a two-column CSV (`id,problem`) with free-text
//! LaTeX statements; the submission leaves as a two-column CSV
//! (`id,answer`) with one row per input problem, in input order. The
//! submission is written atomically (temp file + rename) so a failed run
//! never leaves a partial file behind.

use crate::config::GatewayConfig;
use crate::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::Path;
use tracing::{debug, info};

/// One problem from the test set. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    pub problem: String,
}

/// One row of the output submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRow {
    pub id: String,
    pub answer: u32,
}

/// One row of a reference set (`id,problem,answer`), used for local
/// debug scoring outside scored runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceProblem {
    pub id: String,
    pub problem: String,
    pub answer: i64,
}

/// Load the ordered problem sequence from a `id,problem` CSV.
pub fn load_problems(path: &Path) -> Result<Vec<Problem>> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| HarnessError::dataset(format!("failed to open problems: {}", e), path))?;

    let mut problems = Vec::new();
    for record in reader.deserialize() {
        let problem: Problem = record
            .map_err(|e| HarnessError::dataset(format!("bad problem row: {}", e), path))?;
        problems.push(problem);
    }

    debug!("loaded {} problems from {}", problems.len(), path.display());
    Ok(problems)
}

/// Load a reference set (`id,problem,answer` CSV).
pub fn load_reference(path: &Path) -> Result<Vec<ReferenceProblem>> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| HarnessError::dataset(format!("failed to open reference: {}", e), path))?;

    let mut problems = Vec::new();
    for record in reader.deserialize() {
        let problem: ReferenceProblem = record
            .map_err(|e| HarnessError::dataset(format!("bad reference row: {}", e), path))?;
        problems.push(problem);
    }
    Ok(problems)
}

/// Clamp a raw handler answer into the valid range.
pub fn clamp_answer(raw: i64) -> u32 {
    raw.clamp(
        GatewayConfig::ANSWER_MIN as i64,
        GatewayConfig::ANSWER_MAX as i64,
    ) as u32
}

/// Write the submission atomically: serialize to a temp file next to the
/// target, fsync, then rename over the target path.
pub fn write_submission(path: &Path, rows: &[SubmissionRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)
                .map_err(|e| HarnessError::dataset(format!("create dir failed: {}", e), parent))?;
        }
    }

    let temp_path = path.with_extension(format!("csv.{}.tmp", std::process::id()));

    {
        let file = File::create(&temp_path)
            .map_err(|e| HarnessError::dataset(format!("create failed: {}", e), &temp_path))?;
        // serde only emits the header with the first row, so write it up
        // front; an empty submission is still well-formed.
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        writer
            .write_record(["id", "answer"])
            .map_err(|e| HarnessError::dataset(format!("write failed: {}", e), &temp_path))?;
        for row in rows {
            writer
                .serialize(row)
                .map_err(|e| HarnessError::dataset(format!("write failed: {}", e), &temp_path))?;
        }
        writer
            .flush()
            .map_err(|e| HarnessError::dataset(format!("flush failed: {}", e), &temp_path))?;
        let file = writer
            .into_inner()
            .map_err(|e| HarnessError::dataset(format!("flush failed: {}", e), &temp_path))?;
        file.sync_all()
            .map_err(|e| HarnessError::dataset(format!("fsync failed: {}", e), &temp_path))?;
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        HarnessError::dataset(format!("rename into place failed: {}", e), path)
    })?;

    info!("submission written: {} ({} rows)", path.display(), rows.len());
    Ok(())
}

/// Load a submission back (`id,answer` CSV), for validation and tests.
pub fn load_submission(path: &Path) -> Result<Vec<SubmissionRow>> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| HarnessError::dataset(format!("failed to open submission: {}", e), path))?;

    let mut rows = Vec::new();
    for record in reader.deserialize() {
        let row: SubmissionRow = record
            .map_err(|e| HarnessError::dataset(format!("bad submission row: {}", e), path))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Validate a submission against the input problem list: exactly one row
/// per problem id, in input order, every answer within bounds.
pub fn validate_submission(rows: &[SubmissionRow], problems: &[Problem]) -> Result<()> {
    if rows.len() != problems.len() {
        return Err(HarnessError::InvalidSubmission(format!(
            "expected {} rows, found {}",
            problems.len(),
            rows.len()
        )));
    }

    for (row, problem) in rows.iter().zip(problems) {
        if row.id != problem.id {
            return Err(HarnessError::InvalidSubmission(format!(
                "row for '{}' out of place, expected '{}'",
                row.id, problem.id
            )));
        }
        if row.answer > GatewayConfig::ANSWER_MAX {
            return Err(HarnessError::InvalidSubmission(format!(
                "answer {} for '{}' outside [{}, {}]",
                row.answer,
                row.id,
                GatewayConfig::ANSWER_MIN,
                GatewayConfig::ANSWER_MAX
            )));
        }
    }

    Ok(())
}
