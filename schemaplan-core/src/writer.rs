//! Persists a plan as reviewable migration directories, one per database.
//!
//! ```text
//! <migrations_dir>/<db>/<path>/<YYYYmmddHHMMSS>/
//!     001_create_collection_users.fql
//!     002_create_index_users_by_email.fql
//!     transaction.fql
//!     manifest.json
//! ```
//!
//! Each directory is filled under a hidden `.<timestamp>.partial` sibling and
//! renamed into place once its manifest exists, so a migration directory is
//! either complete or absent.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::checksum::calculate_checksum;
use crate::error::{PlanError, Result};
use crate::statement::Statement;
use crate::{DatabasePlan, MigrationPlan};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const TRANSACTION_FILE: &str = "transaction.fql";

static UNSAFE_CHARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_\-]+").unwrap());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub file: String,
    pub resource: String,
    pub action: String,
    pub checksum: i32,
}

/// Index of a written migration, used to detect later edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub created_at: DateTime<Utc>,
    pub db_path: Vec<String>,
    pub statements: Vec<ManifestEntry>,
    pub transaction: Option<ManifestEntry>,
}

impl Manifest {
    pub fn entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.statements.iter().chain(self.transaction.iter())
    }
}

/// Where one database's migration is staged and where it ends up.
struct Destination {
    staging: PathBuf,
    target: PathBuf,
}

fn io_error(e: std::io::Error, context: String) -> PlanError {
    PlanError::IoError(std::io::Error::new(e.kind(), format!("{}: {}", context, e)))
}

fn statement_file_name(position: usize, stmt: &Statement) -> String {
    let name = UNSAFE_CHARS_RE.replace_all(&stmt.name, "_");
    format!(
        "{:03}_{}_{}_{}.fql",
        position + 1,
        stmt.action,
        stmt.kind.ref_tag(),
        name
    )
}

fn write_file(dir: &Path, file: &str, content: &str) -> Result<i32> {
    let body = format!("{}\n", content);
    let path = dir.join(file);
    fs::write(&path, &body).map_err(|e| io_error(e, format!("Failed to write '{}'", path.display())))?;
    Ok(calculate_checksum(&body))
}

/// Write every file of `database` into a fresh `staging` directory.
fn stage_database(staging: &Path, database: &DatabasePlan, time: DateTime<Utc>) -> Result<()> {
    if let Some(parent) = staging.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| io_error(e, format!("Cannot create '{}'", parent.display())))?;
    }
    // left behind by an interrupted run
    if staging.exists() {
        fs::remove_dir_all(staging)?;
    }
    fs::create_dir(staging)
        .map_err(|e| io_error(e, format!("Cannot create migration directory '{}'", staging.display())))?;

    let mut statements = Vec::with_capacity(database.statements.len());
    for (position, stmt) in database.statements.iter().enumerate() {
        let file = statement_file_name(position, stmt);
        let checksum = write_file(staging, &file, &stmt.fql)?;
        tracing::debug!(file = %file, checksum, "Wrote statement");
        statements.push(ManifestEntry {
            file,
            resource: stmt.key().to_string(),
            action: stmt.action.to_string(),
            checksum,
        });
    }

    let transaction = ManifestEntry {
        file: TRANSACTION_FILE.to_string(),
        resource: database.db_path.join("/"),
        action: "transaction".to_string(),
        checksum: write_file(staging, TRANSACTION_FILE, &database.transaction.fql)?,
    };

    let manifest = Manifest {
        created_at: time,
        db_path: database.db_path.clone(),
        statements,
        transaction: Some(transaction),
    };
    fs::write(staging.join(MANIFEST_FILE), serde_json::to_string_pretty(&manifest)?)?;
    Ok(())
}

fn discard(path: &Path) {
    if !path.exists() {
        return;
    }
    if let Err(e) = fs::remove_dir_all(path) {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove incomplete migration");
    }
}

/// Write `plan` as one migration per database, under `dir/<db_path...>/<timestamp>`.
///
/// Returns the migration directories in execution order; none for an empty
/// plan. Nothing is written if any target directory already exists, and a
/// failed write leaves none of this plan's directories behind.
pub fn write_migration(dir: &Path, plan: &MigrationPlan, time: DateTime<Utc>) -> Result<Vec<PathBuf>> {
    if plan.databases.is_empty() {
        tracing::info!("Plan is empty, nothing to write");
        return Ok(Vec::new());
    }

    let timestamp = time.format("%Y%m%d%H%M%S").to_string();
    let mut destinations = Vec::with_capacity(plan.databases.len());
    for database in &plan.databases {
        let mut parent = dir.to_path_buf();
        parent.extend(&database.db_path);
        let target = parent.join(&timestamp);
        if target.exists() {
            return Err(io_error(
                std::io::Error::from(ErrorKind::AlreadyExists),
                format!("Cannot create migration directory '{}'", target.display()),
            ));
        }
        destinations.push(Destination {
            staging: parent.join(format!(".{}.partial", timestamp)),
            target,
        });
    }

    for (database, destination) in plan.databases.iter().zip(&destinations) {
        if let Err(e) = stage_database(&destination.staging, database, time) {
            destinations.iter().for_each(|d| discard(&d.staging));
            return Err(e);
        }
    }

    for (published, destination) in destinations.iter().enumerate() {
        if let Err(e) = fs::rename(&destination.staging, &destination.target) {
            destinations[..published].iter().for_each(|d| discard(&d.target));
            destinations[published..].iter().for_each(|d| discard(&d.staging));
            return Err(io_error(
                e,
                format!("Cannot publish migration directory '{}'", destination.target.display()),
            ));
        }
        tracing::info!(path = %destination.target.display(), "Wrote migration");
    }

    Ok(destinations.into_iter().map(|d| d.target).collect())
}

pub fn read_manifest(migration_dir: &Path) -> Result<Manifest> {
    let path = migration_dir.join(MANIFEST_FILE);
    let text = fs::read_to_string(&path)
        .map_err(|e| io_error(e, format!("Failed to read manifest '{}'", path.display())))?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::plan::build_plan;
    use crate::config::PlannerConfig;
    use crate::diff::PlannedDiffPerResource;
    use crate::expr::Expr;
    use crate::transform::create_to_delete;
    use chrono::TimeZone;
    use serde_json::json;

    fn users() -> Statement {
        Statement::from_create(
            &[],
            Expr::from_wire(&json!({"create_collection": {"object": {"name": "users"}}})).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_statement_file_name() {
        assert_eq!(statement_file_name(0, &users()), "001_create_collection_users.fql");
        let delete = create_to_delete(&users()).unwrap();
        assert_eq!(statement_file_name(11, &delete), "012_delete_collection_users.fql");
    }

    #[test]
    fn test_file_name_is_sanitized() {
        let mut stmt = users();
        stmt.name = "../weird name".to_string();
        assert_eq!(statement_file_name(0, &stmt), "001_create_collection__weird_name.fql");
    }

    fn plan_for_users() -> MigrationPlan {
        let diff = PlannedDiffPerResource::from_json(
            r#"{"Collection": {"added": [{"target": {"expr": {"create_collection": {"object": {"name": "users"}}}}}]}}"#,
        )
        .unwrap();
        build_plan(&PlannerConfig::default(), &diff).unwrap()
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_empty_plan_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let plan = MigrationPlan::default();
        let time = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert!(write_migration(dir.path(), &plan, time).unwrap().is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_interrupted_staging_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join(".20240102030405.partial");
        fs::create_dir(&staging).unwrap();
        fs::write(staging.join("001_create_collection_leftover.fql"), "x\n").unwrap();

        let time = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let written = write_migration(dir.path(), &plan_for_users(), time).unwrap();
        assert_eq!(written, vec![dir.path().join("20240102030405")]);
        assert_eq!(names(dir.path()), vec!["20240102030405"]);
        assert_eq!(
            names(&written[0]),
            vec!["001_create_collection_users.fql", MANIFEST_FILE, TRANSACTION_FILE]
        );
    }

    #[test]
    fn test_existing_migration_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("20240102030405");
        fs::create_dir(&target).unwrap();

        let time = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let err = write_migration(dir.path(), &plan_for_users(), time).unwrap_err();
        assert!(matches!(err, PlanError::IoError(ref e) if e.kind() == ErrorKind::AlreadyExists));
        assert_eq!(names(dir.path()), vec!["20240102030405"]);
        assert!(names(&target).is_empty());
    }
}
