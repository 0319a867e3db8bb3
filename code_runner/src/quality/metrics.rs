//! Text-level metrics for Python-like source. These never execute the code.

use regex::Regex;
use std::sync::LazyLock;

static DECISION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(if|elif|for|while|except|and|or|case)\b").expect("valid regex")
});

static FUNCTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:async[ \t]+)?def[ \t]+\w+").expect("valid regex"));

static DEFINITION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[ \t]*(?:async[ \t]+def|def|class)[ \t]+\w+").expect("valid regex"));

/// Blanks out string literals and comments, keeping line structure, so that
/// keyword and bracket scans only see code.
///
/// Fails on a string literal that is never closed.
pub fn code_only(source: &str) -> Result<String, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut i = 0;
    let mut line = 1;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    out.push(' ');
                    i += 1;
                }
            }
            '\'' | '"' => {
                let start_line = line;
                let triple = i + 2 < chars.len() && chars[i + 1] == c && chars[i + 2] == c;
                let width = if triple { 3 } else { 1 };
                out.push_str(&" ".repeat(width));
                i += width;
                loop {
                    if i >= chars.len() {
                        return Err(format!("unterminated string literal starting on line {start_line}"));
                    }
                    let d = chars[i];
                    if d == '\\' {
                        out.push(' ');
                        i += 1;
                        if i < chars.len() {
                            if chars[i] == '\n' {
                                line += 1;
                                out.push('\n');
                            } else {
                                out.push(' ');
                            }
                            i += 1;
                        }
                        continue;
                    }
                    if d == '\n' {
                        if !triple {
                            return Err(format!("unterminated string literal on line {start_line}"));
                        }
                        line += 1;
                        out.push('\n');
                        i += 1;
                        continue;
                    }
                    if d == c
                        && (!triple || (i + 2 < chars.len() && chars[i + 1] == c && chars[i + 2] == c))
                    {
                        out.push_str(&" ".repeat(width));
                        i += width;
                        break;
                    }
                    out.push(' ');
                    i += 1;
                }
            }
            '\n' => {
                line += 1;
                out.push('\n');
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    Ok(out)
}

/// Checks that `()`, `[]` and `{}` nest properly outside strings and comments.
pub fn check_balance(source: &str) -> Result<(), String> {
    let code = code_only(source)?;
    let mut stack: Vec<(char, usize)> = Vec::new();

    for (idx, text) in code.lines().enumerate() {
        let line = idx + 1;
        for c in text.chars() {
            match c {
                '(' | '[' | '{' => stack.push((c, line)),
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match stack.pop() {
                        Some((open, _)) if open == expected => {}
                        Some((open, at)) => {
                            return Err(format!(
                                "'{c}' on line {line} does not close '{open}' from line {at}"
                            ));
                        }
                        None => return Err(format!("unmatched '{c}' on line {line}")),
                    }
                }
                _ => {}
            }
        }
    }
    match stack.pop() {
        Some((open, at)) => Err(format!("'{open}' opened on line {at} is never closed")),
        None => Ok(()),
    }
}

/// 0..=10 where 10 means every function is straight-line code.
///
/// Each function starts at complexity 1 and gains one per decision keyword;
/// the score is `11 - average`, clamped. Top-level code counts as one unit
/// when there are no functions.
pub fn complexity_score(source: &str) -> f64 {
    let code = match code_only(source) {
        Ok(code) => code,
        Err(_) => return 0.0,
    };
    let decisions = DECISION.find_iter(&code).count() as f64;
    let units = FUNCTION.find_iter(&code).count().max(1) as f64;
    let average = 1.0 + decisions / units;
    round2((11.0 - average).clamp(0.0, 10.0))
}

/// 0..=10: seven points for docstring coverage of functions and classes,
/// three for comment density (comment lines per code line, full marks at 0.2).
pub fn documentation_score(source: &str) -> f64 {
    let lines: Vec<&str> = source.lines().collect();

    let mut definitions = 0usize;
    let mut documented = 0usize;
    for (i, line) in lines.iter().enumerate() {
        if !DEFINITION.is_match(line) {
            continue;
        }
        definitions += 1;
        let header_end = (i..lines.len())
            .find(|&j| lines[j].trim_end().ends_with(':'))
            .unwrap_or(i);
        let body = lines[header_end + 1..].iter().find(|l| !l.trim().is_empty());
        if body.is_some_and(|l| starts_docstring(l)) {
            documented += 1;
        }
    }

    let coverage = if definitions == 0 {
        let first = lines.iter().find(|l| !l.trim().is_empty());
        if first.is_some_and(|l| starts_docstring(l)) { 1.0 } else { 0.0 }
    } else {
        documented as f64 / definitions as f64
    };

    let comment_lines = lines.iter().filter(|l| l.trim_start().starts_with('#')).count();
    let code_lines = lines
        .iter()
        .filter(|l| {
            let t = l.trim();
            !t.is_empty() && !t.starts_with('#')
        })
        .count();
    let density = if code_lines == 0 {
        0.0
    } else {
        (comment_lines as f64 / code_lines as f64 / 0.2).min(1.0)
    };

    round2(7.0 * coverage + 3.0 * density)
}

fn starts_docstring(line: &str) -> bool {
    let t = line.trim_start();
    let t = t.strip_prefix(['r', 'R', 'u', 'U']).unwrap_or(t);
    t.starts_with("\"\"\"") || t.starts_with("'''") || t.starts_with('"') || t.starts_with('\'')
}

#[inline]
fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_and_comments_are_blanked() {
        let code = code_only("x = '(' # )\ny = \"\"\"[\n]\"\"\"\n").unwrap();
        assert!(!code.contains('('));
        assert!(!code.contains('['));
        assert_eq!(code.lines().count(), 3);
    }

    #[test]
    fn balance_detects_unclosed_and_mismatched() {
        assert!(check_balance("print((1, 2)\n").unwrap_err().contains("never closed"));
        assert!(check_balance("x = [1, 2)\n").unwrap_err().contains("does not close"));
        assert!(check_balance("x = ')'\nprint(x)\n").is_ok());
        assert!(check_balance("s = 'open\n").unwrap_err().contains("unterminated"));
    }

    #[test]
    fn straight_line_code_scores_ten() {
        assert_eq!(complexity_score("def f(x):\n    return x + 1\n"), 10.0);
    }

    #[test]
    fn branching_lowers_complexity_score() {
        let src = "def f(x):\n    if x and x > 1:\n        return 1\n    elif x:\n        return 2\n    for i in range(3):\n        pass\n    return 0\n";
        // four decisions in one function: average 5
        assert_eq!(complexity_score(src), 6.0);
    }

    #[test]
    fn keywords_inside_strings_do_not_count() {
        assert_eq!(complexity_score("def f():\n    return 'if or and while'\n"), 10.0);
    }

    #[test]
    fn documentation_rewards_docstrings_and_comments() {
        let bare = "def f(x):\n    return x\n";
        let documented = "def f(x):\n    \"\"\"Identity.\"\"\"\n    # pass through\n    return x\n";
        assert_eq!(documentation_score(bare), 0.0);
        // full coverage, density 1/3 saturates
        assert_eq!(documentation_score(documented), 10.0);
    }
}
