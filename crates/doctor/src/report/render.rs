//! Console rendering.

use std::collections::BTreeSet;
use std::fmt::Write;

use colored::Colorize;

use super::{Finding, HealthReport, SectionState, Severity};
use crate::model::{Category, FailureScope};

const WIDTH: usize = 70;

/// Render the report as colored console text.
///
/// With `only`, sections outside the set are left out and the summary is
/// computed over the remaining findings.
#[must_use]
pub fn render(report: &HealthReport, only: Option<&BTreeSet<Category>>) -> String {
    let filtered;
    let report = match only {
        Some(only) => {
            filtered = report.filtered(only);
            &filtered
        }
        None => report,
    };

    let mut out = String::new();
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", "═".repeat(WIDTH).bright_black());
    let _ = writeln!(
        out,
        "{}",
        format!("EKS Health Report: {}", report.cluster).cyan().bold()
    );
    let _ = writeln!(out, "{}", "═".repeat(WIDTH).bright_black());
    let _ = writeln!(
        out,
        "{}",
        format!("Generated {}", report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")).bright_black()
    );

    for category in Category::ALL {
        if only.is_some_and(|only| !only.contains(&category)) {
            continue;
        }
        section(&mut out, report, category);
    }

    summary(&mut out, report);
    out
}

/// Print the report to stdout.
pub fn print(report: &HealthReport, only: Option<&BTreeSet<Category>>) {
    print!("{}", render(report, only));
}

fn section(out: &mut String, report: &HealthReport, category: Category) {
    let _ = writeln!(out);
    let _ = writeln!(out, "{} {}", "▶".cyan(), category.title().bold());

    match report.section(category) {
        SectionState::Skipped => {
            let _ = writeln!(out, "  {} {}", "⏭".bright_black(), "skipped".bright_black());
        }
        SectionState::NotEvaluated(cause) => {
            let _ = writeln!(
                out,
                "  {} {}",
                "✗".red().bold(),
                format!("could not be evaluated: {cause}").red()
            );
        }
        SectionState::Clean => {
            if category == Category::Versions {
                versions(out, report);
            }
            let _ = writeln!(out, "  {} {}", "✓".green().bold(), "no issues found".green());
        }
        SectionState::Issues(findings) => {
            if category == Category::Versions {
                versions(out, report);
            }
            for finding in findings {
                line(out, finding);
            }
        }
    }

    for degraded in report.degraded_probes(category) {
        let _ = writeln!(
            out,
            "  {} {}",
            "⚠".yellow().bold(),
            format!("partially evaluated: {}", degraded.cause).yellow()
        );
    }
}

fn versions(out: &mut String, report: &HealthReport) {
    if let Some(version) = report.status.control_plane.version.as_deref() {
        let _ = writeln!(out, "  {} control plane {version}", "ℹ".blue().bold());
    }
    for (version, nodes) in &report.status.node_versions {
        let _ = writeln!(
            out,
            "  {} kubelet {version}: {} node(s)",
            "ℹ".blue().bold(),
            nodes.len()
        );
    }
}

fn line(out: &mut String, finding: &Finding) {
    let message = finding.message.as_str();
    let _ = match finding.severity {
        Severity::Critical => writeln!(out, "  {} {}", "✗".red().bold(), message.red()),
        Severity::Warning => writeln!(out, "  {} {}", "⚠".yellow().bold(), message.yellow()),
        Severity::Info => writeln!(out, "  {} {}", "ℹ".blue().bold(), message),
    };
}

fn summary(out: &mut String, report: &HealthReport) {
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", "═".repeat(WIDTH).bright_black());
    let _ = writeln!(out, "{}", "Summary".cyan().bold());
    let _ = writeln!(out, "{}", "═".repeat(WIDTH).bright_black());

    let counts = format!(
        "Total issues: {} (critical: {})",
        report.total_count, report.critical_count
    );
    let _ = if report.critical_count > 0 {
        writeln!(out, "{}", counts.red().bold())
    } else if report.total_count > 0 {
        writeln!(out, "{}", counts.yellow().bold())
    } else {
        writeln!(out, "{}", counts.green().bold())
    };

    let unevaluated: Vec<&str> = report
        .failures
        .iter()
        .filter(|f| f.scope == FailureScope::Check)
        .map(|f| f.category.tag())
        .collect();
    if !unevaluated.is_empty() {
        let _ = writeln!(
            out,
            "{} {}",
            "⚠".yellow().bold(),
            format!("Not evaluated: {}", unevaluated.join(", ")).yellow()
        );
    }

    if report.recommendations.is_empty() {
        return;
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", "Recommendations".bold());
    for (i, recommendation) in report.recommendations.iter().enumerate() {
        let _ = writeln!(out, "  {}. {recommendation}", i + 1);
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;
    use crate::model::{CheckFailure, ClusterHealthStatus, HealthRun};
    use crate::report::synthesize;

    fn plain() {
        colored::control::set_override(false);
    }

    fn run_with_failure() -> HealthRun {
        let mut status = ClusterHealthStatus::default();
        status.nodes.not_ready = vec!["n7".to_string()];
        HealthRun {
            status,
            failures: vec![CheckFailure {
                category: Category::Networking,
                scope: FailureScope::Check,
                cause: "permission denied: pods".to_string(),
            }],
            evaluated: vec![Category::Nodes, Category::LoadBalancing],
            skipped: vec![Category::Storage],
        }
    }

    #[test]
    #[serial]
    fn test_failed_section_is_distinct_from_clean() {
        plain();
        let report = synthesize("prod", &run_with_failure());
        let text = render(&report, None);

        assert!(text.contains("EKS Health Report: prod"));
        assert!(text.contains("could not be evaluated: permission denied: pods"));
        assert!(text.contains("✓ no issues found"));
        assert!(text.contains("⏭ skipped"));
        assert!(text.contains("✗ Node n7 is NotReady"));
        assert!(text.contains("Total issues: 1 (critical: 0)"));
        assert!(text.contains("Not evaluated: networking"));
        assert!(text.contains("1. Investigate nodes in NotReady state"));
    }

    #[test]
    #[serial]
    fn test_only_filter_limits_sections() {
        plain();
        let report = synthesize("prod", &run_with_failure());
        let only: BTreeSet<Category> = [Category::LoadBalancing].into_iter().collect();
        let text = render(&report, Some(&only));

        assert!(text.contains("Load Balancers"));
        assert!(!text.contains("Node Readiness"));
        assert!(!text.contains("could not be evaluated"));
        assert!(text.contains("Total issues: 0 (critical: 0)"));
    }
}
