use colored::Colorize;
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, ContentArrangement, Table};

use schemaplan_core::commands::plan::PlannedStatement;
use schemaplan_core::{DepsReport, PlanReport, StatementKind, StatementOrigin, VerifyReport};

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.into_iter().map(Cell::new).collect::<Vec<_>>());
    table
}

fn format_action(action: StatementKind) -> String {
    match action {
        StatementKind::Create => "create".green().to_string(),
        StatementKind::Update => "update".cyan().to_string(),
        StatementKind::Delete => "delete".red().to_string(),
    }
}

fn format_origin(origin: StatementOrigin) -> String {
    match origin {
        StatementOrigin::Diff => "".to_string(),
        StatementOrigin::Stub => "stub".yellow().to_string(),
        StatementOrigin::StubFollowUp => "completes stub".yellow().to_string(),
    }
}

fn print_statement_table(statements: &[PlannedStatement]) {
    let mut table = new_table(vec!["#", "Action", "Resource", "Note", "Depends On"]);
    for stmt in statements {
        table.add_row(vec![
            Cell::new(stmt.position),
            Cell::new(format_action(stmt.action)),
            Cell::new(&stmt.resource),
            Cell::new(format_origin(stmt.origin)),
            Cell::new(stmt.depends_on.join("\n")),
        ]);
    }
    println!("{table}");
}

/// Print the ordered plan and its compiled transaction.
pub fn print_plan(report: &PlanReport) {
    if report.statements.is_empty() {
        println!("{}", "Schema is up to date. No migration necessary.".green());
        return;
    }

    print_statement_table(&report.statements);

    if !report.stubbed.is_empty() {
        println!(
            "{}",
            format!(
                "Broke dependency cycle(s) with {} stub(s): {}",
                report.stubbed.len(),
                report.stubbed.join(", ")
            )
            .yellow()
        );
    }

    for tx in &report.transactions {
        let database = if tx.db_path.is_empty() {
            "root database".to_string()
        } else {
            format!("database {}", tx.db_path.join("/"))
        };
        println!();
        println!(
            "{}",
            format!("Transaction for {} ({} step(s)):", database, tx.bindings.len()).bold()
        );
        println!("{}", tx.fql);
    }

    if !report.written_to.is_empty() {
        println!();
    }
    for path in &report.written_to {
        println!(
            "{}",
            format!("Wrote migration to {}", path.display()).green().bold()
        );
    }
}

/// Format dependency edges as a table.
pub fn print_deps_table(report: &DepsReport) {
    if report.resources.is_empty() {
        println!("{}", "No changes found.".yellow());
        return;
    }

    let mut table = new_table(vec!["Resource", "Action", "Depends On"]);
    for row in &report.resources {
        let deps = if row.depends_on.is_empty() {
            "-".dimmed().to_string()
        } else {
            row.depends_on.join("\n")
        };
        table.add_row(vec![
            Cell::new(&row.resource),
            Cell::new(format_action(row.action)),
            Cell::new(deps),
        ]);
    }
    println!("{table}");
    println!(
        "{}",
        format!("{} resource(s), {} dependency edge(s)", report.resources.len(), report.edge_count).dimmed()
    );
}

/// Print a verify report.
pub fn print_verify_result(report: &VerifyReport) {
    if report.valid {
        println!(
            "{}",
            format!("Successfully verified {} file(s) in {}.", report.checked, report.migration.display())
                .green()
                .bold()
        );
    }

    for warning in &report.warnings {
        println!("{} {}", "WARNING:".yellow().bold(), warning);
    }

    for issue in &report.issues {
        println!("{} {}", "ERROR:".red().bold(), issue);
    }
}
