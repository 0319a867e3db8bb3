//! Quality Analyzer: static style, complexity and documentation checks.

pub mod linter;
pub mod metrics;

use regex::Regex;
use std::sync::LazyLock;
use tracing::info;
use util::task_config::ModuleConfig;

use crate::types::{QualityResult, StyleIssue, ToolReport};
use linter::Linter;

/// `path:line:col: CODE message`, the flake8/pycodestyle report format.
static LINT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:.+?):(\d+):(?:\d+):?\s+([A-Z]+\d+)\s+(.*)$").expect("valid regex")
});

/// Analyzes one module's submission.
///
/// Never fails: code that is missing or cannot be parsed yields zero scores
/// with `unparseable` set and a reason.
pub async fn analyze(linter: &dyn Linter, module: &ModuleConfig, code: Option<&str>) -> QualityResult {
    let module_id = module.module_id.as_str();

    let Some(code) = code.filter(|c| !c.trim().is_empty()) else {
        return unparseable(module_id, "no source submitted", Vec::new(), Vec::new());
    };

    let tools = linter.lint(code, &module.solution_file).await;
    let issues = collect_issues(&tools);

    let syntax = issues
        .iter()
        .find(|i| i.code.as_deref() == Some("E999"))
        .map(|i| i.message.clone());
    if let Some(reason) = syntax.or_else(|| metrics::check_balance(code).err()) {
        info!(module = module_id, reason = %reason, "submission is unparseable");
        return unparseable(module_id, &reason, issues, tools);
    }

    let result = QualityResult {
        module_id: module_id.to_string(),
        style_issue_count: issues.len() as u32,
        complexity_score: metrics::complexity_score(code),
        documentation_score: metrics::documentation_score(code),
        unparseable: false,
        unparseable_reason: None,
        issues,
        tools,
    };
    info!(
        module = module_id,
        style_issues = result.style_issue_count,
        complexity = result.complexity_score,
        documentation = result.documentation_score,
        "quality analysis complete"
    );
    result
}

fn unparseable(
    module_id: &str,
    reason: &str,
    issues: Vec<StyleIssue>,
    tools: Vec<ToolReport>,
) -> QualityResult {
    QualityResult {
        module_id: module_id.to_string(),
        style_issue_count: issues.len() as u32,
        complexity_score: 0.0,
        documentation_score: 0.0,
        unparseable: true,
        unparseable_reason: Some(reason.to_string()),
        issues,
        tools,
    }
}

/// One issue per recognised report line; a tool that flags issues in some
/// other format contributes a single summary issue.
pub fn collect_issues(tools: &[ToolReport]) -> Vec<StyleIssue> {
    let mut issues = Vec::new();
    for report in tools.iter().filter(|t| t.has_issues) {
        let before = issues.len();
        for line in report.output.lines() {
            if let Some(cap) = LINT_LINE.captures(line.trim()) {
                issues.push(StyleIssue {
                    tool: report.tool.clone(),
                    line: cap[1].parse().ok(),
                    code: Some(cap[2].to_string()),
                    message: cap[3].trim().to_string(),
                });
            }
        }
        if issues.len() == before {
            issues.push(StyleIssue {
                tool: report.tool.clone(),
                line: None,
                code: None,
                message: format!("{} reported formatting or style problems", report.tool),
            });
        }
    }
    issues
}
