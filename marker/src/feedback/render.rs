//! Markdown is the canonical form; HTML and text are derived from it.

use super::{Feedback, FeedbackSections};
use std::fmt::Write;

const SECTION_TITLES: [&str; 6] = [
    "Strengths",
    "Test Analysis",
    "Code Quality",
    "Suggestions",
    "Examples",
    "Closing",
];

const EMPTY_SECTION: &str = "*Nothing to report.*";

const HTML_STYLE: &str = "\
body { font-family: Arial, sans-serif; line-height: 1.6; max-width: 800px; margin: 0 auto; padding: 20px; }
h1, h2, h3 { color: #2c3e50; }
h2 { border-bottom: 1px solid #eee; padding-bottom: 4px; }
.note { color: #e67e22; font-size: 0.9em; }
code { background-color: #f8f9fa; padding: 2px 4px; border-radius: 4px; }
hr { border: none; border-top: 1px solid #ddd; margin: 24px 0; }";

fn sections_in_order(s: &FeedbackSections) -> [&str; 6] {
    [
        &s.strengths,
        &s.test_analysis,
        &s.quality_issues,
        &s.suggestions,
        &s.examples,
        &s.closing,
    ]
}

pub fn markdown(feedback: &Feedback) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}\n", feedback.heading);

    for module in &feedback.modules {
        match module.score {
            Some((awarded, maximum)) => {
                let _ = writeln!(out, "## {} ({awarded} / {maximum})\n", module.heading());
            }
            None => {
                let _ = writeln!(out, "## {}\n", module.heading());
            }
        }

        for (title, body) in SECTION_TITLES.iter().zip(sections_in_order(&module.sections)) {
            let body = body.trim();
            let _ = writeln!(out, "### {title}\n");
            let _ = writeln!(out, "{}\n", if body.is_empty() { EMPTY_SECTION } else { body });
        }

        if !module.notes.is_empty() {
            let _ = writeln!(out, "**Review notes:**\n");
            for note in &module.notes {
                let _ = writeln!(out, "- {}", note.message);
            }
            out.push('\n');
        }
    }

    out.push_str("---\n\n*This feedback was generated automatically and reviewed for consistency with the awarded score.*\n");
    out
}

/// Wraps converted markdown in a standalone styled document.
pub fn html(title: &str, markdown: &str) -> String {
    let mut body = String::new();
    let mut in_list = false;

    for line in markdown.lines() {
        let trimmed = line.trim();
        let is_item = trimmed.starts_with("- ");
        if in_list && !is_item {
            body.push_str("</ul>\n");
            in_list = false;
        }

        if trimmed.is_empty() {
            continue;
        } else if let Some(h) = trimmed.strip_prefix("### ") {
            let _ = writeln!(body, "<h3>{}</h3>", inline(h));
        } else if let Some(h) = trimmed.strip_prefix("## ") {
            let _ = writeln!(body, "<h2>{}</h2>", inline(h));
        } else if let Some(h) = trimmed.strip_prefix("# ") {
            let _ = writeln!(body, "<h1>{}</h1>", inline(h));
        } else if trimmed == "---" {
            body.push_str("<hr>\n");
        } else if let Some(item) = trimmed.strip_prefix("- ") {
            if !in_list {
                body.push_str("<ul>\n");
                in_list = true;
            }
            let _ = writeln!(body, "<li>{}</li>", inline(item));
        } else {
            let _ = writeln!(body, "<p>{}</p>", inline(trimmed));
        }
    }
    if in_list {
        body.push_str("</ul>\n");
    }

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n<style>\n{HTML_STYLE}\n</style>\n</head>\n<body>\n{body}</body>\n</html>\n",
        escape(title)
    )
}

pub fn text(markdown: &str) -> String {
    markdown
        .lines()
        .filter(|l| l.trim() != "---")
        .map(|l| l.replace(['#', '*', '`'], "").trim().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// `**bold**`, `*em*` and backtick code spans.
fn inline(s: &str) -> String {
    let escaped = escape(s);
    let mut out = String::with_capacity(escaped.len());
    let mut bold = false;
    let mut em = false;
    let mut code = false;
    let mut chars = escaped.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '`' => {
                out.push_str(if code { "</code>" } else { "<code>" });
                code = !code;
            }
            '*' if !code && chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str(if bold { "</strong>" } else { "<strong>" });
                bold = !bold;
            }
            '*' if !code => {
                out.push_str(if em { "</em>" } else { "<em>" });
                em = !em;
            }
            _ => out.push(c),
        }
    }
    // close anything the model left open
    if code {
        out.push_str("</code>");
    }
    if em {
        out.push_str("</em>");
    }
    if bold {
        out.push_str("</strong>");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::{AlignmentNote, ModuleFeedback, NoteSource};
    use util::task_config::FeedbackFormat;

    fn sample() -> Feedback {
        let mut f = Feedback::new("Feedback for u123: prac1", FeedbackFormat::Markdown);
        f.modules.push(ModuleFeedback {
            module_id: "q1".into(),
            title: Some("Sum of list".into()),
            score: Some((3.0, 5.0)),
            sections: FeedbackSections {
                strengths: "Uses `sum()` well".into(),
                test_analysis: "1 of 3 tests **failed**".into(),
                quality_issues: String::new(),
                suggestions: "- Handle the empty list".into(),
                examples: String::new(),
                closing: "Good effort <3".into(),
            },
            notes: vec![AlignmentNote::new(NoteSource::Policy, "Added suggestion")],
            degraded: false,
        });
        f
    }

    #[test]
    fn markdown_has_all_six_sections() {
        let md = sample().render();
        assert!(md.starts_with("# Feedback for u123: prac1"));
        assert!(md.contains("## Sum of list (3 / 5)"));
        for title in SECTION_TITLES {
            assert!(md.contains(&format!("### {title}")), "missing {title}");
        }
        assert!(md.contains(EMPTY_SECTION));
        assert!(md.contains("- Added suggestion"));
    }

    #[test]
    fn html_is_a_standalone_escaped_document() {
        let html = sample().render_as(FeedbackFormat::Html);
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<style>"));
        assert!(html.contains("<h2>Sum of list (3 / 5)</h2>"));
        assert!(html.contains("<code>sum()</code>"));
        assert!(html.contains("<strong>failed</strong>"));
        assert!(html.contains("<li>Handle the empty list</li>"));
        assert!(html.contains("Good effort &lt;3"));
        assert!(html.trim_end().ends_with("</html>"));
    }

    #[test]
    fn text_strips_markup() {
        let text = sample().render_as(FeedbackFormat::Text);
        assert!(!text.contains('#'));
        assert!(!text.contains('*'));
        assert!(!text.contains('`'));
        assert!(text.contains("Uses sum() well"));
        assert!(text.contains("Nothing to report."));
    }
}
