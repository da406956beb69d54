use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use crate::engine::Report;
use crate::models::{RuleId, Severity, Violation};

/// One line per violation on stdout. A clean report prints nothing.
pub fn render(report: &Report, verbose: bool) {
    if report.violations.is_empty() {
        return;
    }

    for v in &report.violations {
        println!("{}", format_line(v));
    }

    if verbose {
        println!();
        println!("{}", summary_table(&report.violations));
        if !report.diagnostics.is_empty() {
            println!(
                " {} {} files or call sites skipped (run with RUST_LOG=warn for details)",
                "[NOTE]".cyan().bold(),
                report.diagnostics.len()
            );
        }
    }
}

/// `path:line:col: error[CTR-rule] message`.
pub fn format_line(v: &Violation) -> String {
    let label = match v.severity {
        Severity::Error => format!("error[{}]", v.rule_id).red().bold(),
        Severity::Warning => format!("warning[{}]", v.rule_id).yellow().bold(),
    };
    format!(
        "{}:{}:{}: {} {}",
        v.file_path, v.start_line, v.start_column, label, v.message
    )
}

fn summary_table(violations: &[Violation]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Rule").add_attribute(Attribute::Bold),
            Cell::new("Errors").add_attribute(Attribute::Bold),
            Cell::new("Warnings").add_attribute(Attribute::Bold),
            Cell::new("Checks").add_attribute(Attribute::Bold),
        ]);

    for (rule, errors, warnings) in count_by_rule(violations) {
        let error_color = if errors > 0 { Color::Red } else { Color::DarkGrey };
        let warning_color = if warnings > 0 { Color::Yellow } else { Color::DarkGrey };
        table.add_row(vec![
            Cell::new(rule.as_str()),
            Cell::new(errors)
                .fg(error_color)
                .set_alignment(CellAlignment::Right),
            Cell::new(warnings)
                .fg(warning_color)
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{}\n{}", rule.description(), rule.why().dimmed())),
        ]);
    }
    table
}

/// `(rule, errors, warnings)` for every rule with at least one violation,
/// in catalog order.
fn count_by_rule(violations: &[Violation]) -> Vec<(RuleId, usize, usize)> {
    RuleId::ALL
        .iter()
        .filter_map(|&rule| {
            let of_rule = violations.iter().filter(|v| v.rule_id == rule);
            let errors = of_rule.clone().filter(|v| v.severity == Severity::Error).count();
            let warnings = of_rule.filter(|v| v.severity == Severity::Warning).count();
            (errors + warnings > 0).then_some((rule, errors, warnings))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violation(rule_id: RuleId, severity: Severity) -> Violation {
        Violation {
            rule_id,
            severity,
            message: "orders-api GET /orders/{id}: missing dual-side test: no test exercises the consumer side (web)"
                .to_string(),
            file_path: "web/src/api.ts".to_string(),
            start_line: 8,
            start_column: 21,
        }
    }

    #[test]
    fn test_format_line() {
        colored::control::set_override(false);
        let line = format_line(&violation(RuleId::DualTest, Severity::Error));
        assert_eq!(
            line,
            "web/src/api.ts:8:21: error[CTR-dual-test] orders-api GET /orders/{id}: missing dual-side test: no test exercises the consumer side (web)"
        );
    }

    #[test]
    fn test_count_by_rule_in_catalog_order() {
        let counts = count_by_rule(&[
            violation(RuleId::DualTest, Severity::Warning),
            violation(RuleId::RequestShape, Severity::Error),
            violation(RuleId::DualTest, Severity::Error),
        ]);
        assert_eq!(
            counts,
            vec![(RuleId::RequestShape, 1, 0), (RuleId::DualTest, 1, 1)]
        );
    }
}
