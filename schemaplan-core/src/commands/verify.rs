use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::checksum::calculate_checksum;
use crate::error::{PlanError, Result};
use crate::writer::{read_manifest, MANIFEST_FILE};

/// Report returned after a verify operation.
#[derive(Debug, Serialize)]
pub struct VerifyReport {
    pub migration: PathBuf,
    pub valid: bool,
    pub checked: usize,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
}

/// Execute the verify command.
///
/// For each file listed in the manifest:
/// - Recalculate the checksum
/// - Report mismatches and missing files
///
/// Files in the directory that the manifest does not list are only warned about.
pub fn execute(migration_dir: &Path) -> Result<VerifyReport> {
    let manifest = read_manifest(migration_dir)?;

    let mut issues = Vec::new();
    let mut warnings = Vec::new();
    let mut listed = HashSet::new();
    listed.insert(MANIFEST_FILE.to_string());

    for entry in manifest.entries() {
        listed.insert(entry.file.clone());
        let path = migration_dir.join(&entry.file);
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let actual = calculate_checksum(&content);
                if actual != entry.checksum {
                    issues.push(format!(
                        "Checksum mismatch for '{}': manifest={}, file={}. \
                         The file has been modified after it was written.",
                        entry.file, entry.checksum, actual
                    ));
                }
            }
            Err(_) => issues.push(format!("Migration file '{}' is missing.", entry.file)),
        }
    }

    for dir_entry in std::fs::read_dir(migration_dir)? {
        let name = dir_entry?.file_name().to_string_lossy().to_string();
        if !listed.contains(&name) {
            warnings.push(format!("File '{}' is not listed in the manifest.", name));
        }
    }
    warnings.sort();

    let valid = issues.is_empty();
    let checked = manifest.entries().count();

    tracing::info!(
        valid = valid,
        issue_count = issues.len(),
        warning_count = warnings.len(),
        "Verification completed"
    );

    if !valid {
        return Err(PlanError::VerificationFailed(issues.join("\n")));
    }

    Ok(VerifyReport {
        migration: migration_dir.to_path_buf(),
        valid,
        checked,
        issues,
        warnings,
    })
}
