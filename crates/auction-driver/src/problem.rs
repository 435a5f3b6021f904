// SPDX-License-Identifier: AGPL-3.0-only

//! Problem instance files.
//!
//! A problem is a CSV file with one row per agent and one integer reward
//! per object. Blank lines are ignored and fields are trimmed. An empty
//! file is not an error; it simply holds no problem and is skipped.

use crate::assignment::Assignment;
use crate::error::{AuctionError, Result};
use crate::matrix::RewardMatrix;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Parse CSV text into integer rows, skipping blank lines.
fn parse_rows<T: std::str::FromStr>(text: &str, origin: &Path) -> Result<Vec<Vec<T>>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(line_no, line)| {
            line.split(',')
                .map(str::trim)
                .enumerate()
                .map(|(col, field)| {
                    field.parse::<T>().map_err(|_| {
                        AuctionError::invalid_problem(format!(
                            "{}:{}: column {}: {field:?} is not an integer",
                            origin.display(),
                            line_no + 1,
                            col + 1
                        ))
                    })
                })
                .collect::<Result<Vec<T>>>()
        })
        .collect()
}

/// Parse reward CSV text. Returns `None` if the text holds no rows.
///
/// # Errors
///
/// Returns error on non-integer fields or ragged rows.
pub fn parse_rewards(text: &str, origin: &Path) -> Result<Option<RewardMatrix>> {
    let rows = parse_rows::<u64>(text, origin)?;
    if rows.is_empty() {
        return Ok(None);
    }
    RewardMatrix::from_rows(rows)
        .map(Some)
        .map_err(|e| AuctionError::invalid_problem(format!("{}: {e}", origin.display())))
}

/// Load a reward matrix. Returns `None` for an empty file.
///
/// # Errors
///
/// Returns error if the file cannot be read or is malformed.
pub fn load_csv(path: &Path) -> Result<Option<RewardMatrix>> {
    let text = fs::read_to_string(path)?;
    let rewards = parse_rewards(&text, path)?;
    if let Some(m) = &rewards {
        debug!("Loaded {}: {}×{}", path.display(), m.n_agents(), m.n_objects());
    }
    Ok(rewards)
}

/// Load an assignment stored as comma-separated signed agent indices
/// (`-1` = unassigned), possibly spread over several lines.
///
/// # Errors
///
/// Returns error if the file cannot be read or holds invalid indices.
pub fn load_assignment(path: &Path) -> Result<Assignment> {
    let text = fs::read_to_string(path)?;
    let values: Vec<i64> = parse_rows::<i64>(&text, path)?.into_iter().flatten().collect();
    Assignment::from_signed(&values)
}

/// Load raw hardware result words (`0` = unassigned).
///
/// # Errors
///
/// Returns error if the file cannot be read or holds non-integers.
pub fn load_words(path: &Path) -> Result<Vec<u64>> {
    let text = fs::read_to_string(path)?;
    Ok(parse_rows::<u64>(&text, path)?.into_iter().flatten().collect())
}

/// List `*.csv` files in `dirs`, each directory sorted by file name.
///
/// # Errors
///
/// Returns error if a directory cannot be read.
pub fn discover<P: AsRef<Path>>(dirs: &[P]) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for dir in dirs {
        let dir = dir.as_ref();
        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|e| {
                AuctionError::invalid_problem(format!("cannot list {}: {e}", dir.display()))
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "csv"))
            .collect();
        files.sort();
        debug!("{}: {} problem files", dir.display(), files.len());
        found.extend(files);
    }
    Ok(found)
}
