//! Reading pytest test files and verbose pytest output.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static TEST_DEF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:async[ \t]+)?def[ \t]+(test_\w+)[ \t]*\(").expect("valid regex")
});

static VERBOSE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(\S+?)::(\S+)\s+(PASSED|FAILED|ERROR|SKIPPED|XFAIL|XPASS)\b")
        .expect("valid regex")
});

static SUMMARY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:FAILED|ERROR) \S+?::(\S+)(?: - (.*))?$").expect("valid regex")
});

static SECTION_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^_{3,} (.+?) _{3,}$").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseStatus {
    Passed,
    Failed,
    Error,
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCase {
    pub name: String,
    pub status: CaseStatus,
    pub reason: Option<String>,
}

/// Test function names declared in a test file, in source order.
pub fn discover_tests(source: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for cap in TEST_DEF.captures_iter(source) {
        let name = cap[1].to_string();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

/// `TestClass::test_x[param]` -> `test_x`
pub fn base_name(name: &str) -> &str {
    let last = name.rsplit("::").next().unwrap_or(name);
    let last = last.rsplit('.').next().unwrap_or(last);
    last.split('[').next().unwrap_or(last)
}

/// Per-test outcomes from `pytest -v` output, with failure reasons attached
/// from the short summary (`-rfE`) or the `E   ` lines of failure sections.
pub fn parse_output(stdout: &str) -> Vec<ParsedCase> {
    let reasons = failure_reasons(stdout);
    let mut cases: Vec<ParsedCase> = Vec::new();

    for cap in VERBOSE_LINE.captures_iter(stdout) {
        let name = cap[2].to_string();
        if cases.iter().any(|c| c.name == name) {
            continue;
        }
        let status = match &cap[3] {
            "PASSED" | "XPASS" => CaseStatus::Passed,
            "FAILED" => CaseStatus::Failed,
            "ERROR" => CaseStatus::Error,
            _ => CaseStatus::Skipped,
        };
        let reason = match status {
            CaseStatus::Failed | CaseStatus::Error => reasons
                .get(name.as_str())
                .or_else(|| reasons.get(base_name(&name)))
                .cloned(),
            _ => None,
        };
        cases.push(ParsedCase {
            name,
            status,
            reason,
        });
    }
    cases
}

fn failure_reasons(stdout: &str) -> HashMap<&str, String> {
    let mut reasons: HashMap<&str, String> = HashMap::new();

    let mut current: Option<&str> = None;
    let mut lines: Vec<&str> = Vec::new();

    for line in stdout.lines() {
        if let Some(cap) = SECTION_HEADER.captures(line) {
            flush_section(current, &mut lines, &mut reasons);
            current = cap.get(1).map(|m| m.as_str());
        } else if line.starts_with("====") {
            flush_section(current, &mut lines, &mut reasons);
            current = None;
        } else if current.is_some() && line.starts_with("E ") {
            lines.push(line[1..].trim());
        }
    }
    flush_section(current, &mut lines, &mut reasons);

    // summary lines are more specific than section bodies
    for cap in SUMMARY_LINE.captures_iter(stdout) {
        if let (Some(name), Some(msg)) = (cap.get(1), cap.get(2)) {
            reasons.insert(name.as_str(), msg.as_str().trim().to_string());
        }
    }
    reasons
}

fn flush_section<'a>(
    name: Option<&'a str>,
    lines: &mut Vec<&'a str>,
    reasons: &mut HashMap<&'a str, String>,
) {
    if let Some(name) = name {
        if !lines.is_empty() {
            reasons.insert(base_name(name), lines.join("\n"));
        }
    }
    lines.clear();
}
