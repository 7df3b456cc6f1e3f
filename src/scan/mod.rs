//! Input discovery
//!
//! Finds the series files under the input directory and maps each one to the
//! report it produces under the output directory, mirroring the relative layout.

use anyhow::{Context, Result};
use globset::{Glob, GlobMatcher};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::domain::REPORT_SUFFIX;

/// An input file paired with its report location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    /// Absolute (or input-dir-joined) path to read from
    pub path: PathBuf,

    /// Path relative to the input directory, `/`-separated
    pub relative_path: String,

    /// Where the per-file report is written
    pub report_path: PathBuf,
}

/// Walk `input_dir` and return every file whose relative path matches `pattern`,
/// sorted by relative path.
pub fn discover_inputs(
    input_dir: &Path,
    output_dir: &Path,
    pattern: &str,
) -> Result<Vec<InputFile>> {
    if !input_dir.is_dir() {
        anyhow::bail!("Input directory does not exist: {}", input_dir.display());
    }
    let matcher = build_matcher(pattern)?;

    let mut inputs = Vec::new();
    for entry in WalkDir::new(input_dir).follow_links(true).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", input_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(input_dir) else {
            continue;
        };
        let relative_path = normalize_relative(relative);
        if !matcher.is_match(&relative_path) {
            continue;
        }
        inputs.push(InputFile {
            path: entry.path().to_path_buf(),
            report_path: report_path_for(output_dir, relative),
            relative_path,
        });
    }

    inputs.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    disambiguate_reports(&mut inputs, output_dir)?;
    Ok(inputs)
}

/// Inputs sharing a stem in one directory keep their full file name in the
/// report name, e.g. `a.json` and `a.txt` become `a.json.registration.json`
/// and `a.txt.registration.json`.
fn disambiguate_reports(inputs: &mut [InputFile], output_dir: &Path) -> Result<()> {
    let mut counts: HashMap<PathBuf, usize> = HashMap::new();
    for input in inputs.iter() {
        *counts.entry(input.report_path.clone()).or_default() += 1;
    }
    for input in inputs
        .iter_mut()
        .filter(|input| counts[&input.report_path] > 1)
    {
        let relative = Path::new(&input.relative_path);
        let name = relative
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("input");
        input.report_path = report_path_named(output_dir, relative, name);
    }

    let mut seen = HashSet::new();
    for input in inputs.iter() {
        if !seen.insert(&input.report_path) {
            anyhow::bail!(
                "Several inputs map to the same report {}",
                input.report_path.display()
            );
        }
    }
    Ok(())
}

fn build_matcher(pattern: &str) -> Result<GlobMatcher> {
    let glob = Glob::new(pattern.trim())
        .with_context(|| format!("Invalid input glob '{pattern}'"))?;
    Ok(glob.compile_matcher())
}

fn normalize_relative(relative: &Path) -> String {
    relative.to_string_lossy().replace('\\', "/")
}

/// `<output_dir>/<relative dir>/<stem>.registration.json`
pub fn report_path_for(output_dir: &Path, relative: &Path) -> PathBuf {
    let stem = relative
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("input");
    report_path_named(output_dir, relative, stem)
}

fn report_path_named(output_dir: &Path, relative: &Path, name: &str) -> PathBuf {
    let file_name = format!("{name}.{REPORT_SUFFIX}");
    match relative.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            output_dir.join(parent).join(file_name)
        }
        _ => output_dir.join(file_name),
    }
}
