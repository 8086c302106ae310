//! Readiness verdict parsing.
//!
//! The agent's stdout is scanned for a verdict using several formats, tried
//! in order; the first one that matches wins. Unrecognized output yields
//! `Unknown`, which callers treat as a non-fatal per-issue failure rather
//! than propagating a parse error.

use std::fmt;

use regex::Regex;

/// Closed set of readiness verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Ready,
    Corrected,
    NotReady,
    NeedsReview,
    Close,
    Unknown,
}

impl Verdict {
    /// `READY` and `CORRECTED` authorize the implementation pass.
    pub fn authorizes_implementation(self) -> bool {
        matches!(self, Self::Ready | Self::Corrected)
    }

    fn parse_keyword(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "READY" => Some(Self::Ready),
            "CORRECTED" => Some(Self::Corrected),
            "NOT_READY" => Some(Self::NotReady),
            "NEEDS_REVIEW" => Some(Self::NeedsReview),
            "CLOSE" => Some(Self::Close),
            "UNKNOWN" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ready => "READY",
            Self::Corrected => "CORRECTED",
            Self::NotReady => "NOT_READY",
            Self::NeedsReview => "NEEDS_REVIEW",
            Self::Close => "CLOSE",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Parse the agent's readiness-pass stdout for a verdict.
///
/// Tries, in order:
/// 1. A `## VERDICT` heading followed by the keyword on the next non-blank line.
/// 2. A `VERDICT: KEYWORD` prefix line.
/// 3. A bare keyword mention anywhere in the text.
/// 4. An inferred verdict from a `## READY_FOR` block stating
///    `Implementation: Yes` (treated as `READY`).
///
/// Returns `Verdict::Unknown` if none match.
pub fn parse_verdict(stdout: &str) -> Verdict {
    if let Some(v) = parse_heading_verdict(stdout) {
        return v;
    }
    if let Some(v) = parse_prefix_verdict(stdout) {
        return v;
    }
    if let Some(v) = parse_bare_keyword(stdout) {
        return v;
    }
    if let Some(v) = parse_ready_for_block(stdout) {
        return v;
    }
    Verdict::Unknown
}

fn parse_heading_verdict(stdout: &str) -> Option<Verdict> {
    let lines: Vec<&str> = stdout.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        if line.trim().eq_ignore_ascii_case("## VERDICT") {
            for next in lines.iter().skip(i + 1) {
                let trimmed = next.trim();
                if trimmed.is_empty() {
                    continue;
                }
                return Verdict::parse_keyword(trimmed.trim_start_matches('#').trim());
            }
        }
    }
    None
}

fn parse_prefix_verdict(stdout: &str) -> Option<Verdict> {
    let re = Regex::new(r"(?i)^\s*VERDICT:\s*([A-Z_]+)").expect("valid regex");
    for line in stdout.lines() {
        if let Some(caps) = re.captures(line) {
            if let Some(v) = Verdict::parse_keyword(&caps[1]) {
                return Some(v);
            }
        }
    }
    None
}

fn parse_bare_keyword(stdout: &str) -> Option<Verdict> {
    let re = Regex::new(r"\b(READY|CORRECTED|NOT_READY|NEEDS_REVIEW|CLOSE|UNKNOWN)\b")
        .expect("valid regex");
    re.captures(stdout)
        .and_then(|caps| Verdict::parse_keyword(&caps[1]))
}

fn parse_ready_for_block(stdout: &str) -> Option<Verdict> {
    let lines: Vec<&str> = stdout.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        if line.trim().eq_ignore_ascii_case("## READY_FOR") {
            for next in lines.iter().skip(i + 1).take(10) {
                if next.to_ascii_lowercase().contains("implementation:")
                    && next.to_ascii_lowercase().contains("yes")
                {
                    return Some(Verdict::Ready);
                }
                if next.trim().starts_with("##") {
                    break;
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_heading_format() {
        let stdout = "## Summary\nsome text\n\n## VERDICT\nREADY\n";
        assert_eq!(parse_verdict(stdout), Verdict::Ready);
    }

    #[test]
    fn parses_prefix_format() {
        let stdout = "Looked at the issue.\nVERDICT: CORRECTED\nFixed a typo first.\n";
        assert_eq!(parse_verdict(stdout), Verdict::Corrected);
    }

    #[test]
    fn parses_bare_keyword() {
        let stdout = "After investigation this issue is NOT_READY for implementation.\n";
        assert_eq!(parse_verdict(stdout), Verdict::NotReady);
    }

    #[test]
    fn infers_from_ready_for_block() {
        let stdout = "## READY_FOR\nImplementation: Yes\nTesting: No\n";
        assert_eq!(parse_verdict(stdout), Verdict::Ready);
    }

    #[test]
    fn ready_for_block_without_yes_does_not_infer() {
        let stdout = "## READY_FOR\nImplementation: No\n";
        assert_eq!(parse_verdict(stdout), Verdict::Unknown);
    }

    #[test]
    fn unparseable_output_is_unknown() {
        let stdout = "The agent printed something unrelated entirely.\n";
        assert_eq!(parse_verdict(stdout), Verdict::Unknown);
    }

    #[test]
    fn close_verdict_parses() {
        let stdout = "## VERDICT\nCLOSE\n\nReason: already_fixed\n";
        assert_eq!(parse_verdict(stdout), Verdict::Close);
    }

    #[test]
    fn authorizes_implementation_only_for_ready_and_corrected() {
        assert!(Verdict::Ready.authorizes_implementation());
        assert!(Verdict::Corrected.authorizes_implementation());
        assert!(!Verdict::NotReady.authorizes_implementation());
        assert!(!Verdict::NeedsReview.authorizes_implementation());
        assert!(!Verdict::Close.authorizes_implementation());
        assert!(!Verdict::Unknown.authorizes_implementation());
    }
}
