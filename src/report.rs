//! Before/after reporting for optimizer runs.
//!
//! The optimizer front end writes a sectioned plain-text data file; the
//! `report` subcommand turns one into a self-contained HTML page with the
//! command listings, a unified diff between them, the collapse log and
//! optional before/after snapshots.

use crate::{
    error::{LayerfoldError, LayerfoldResult},
    model::Command,
};

const SECTION_PREFIX: &str = "-----BEGIN ";
const SECTION_END_PREFIX: &str = "-----END ";
const SECTION_SUFFIX: &str = "-----";

const SECTION_BEFORE: &str = "BEFORE COMMANDS";
const SECTION_AFTER: &str = "AFTER COMMANDS";
const SECTION_LOG: &str = "SAVE LAYER LOG";

/// `[index] Command` lines for a sequence, the form used in report listings.
pub fn command_listing(commands: &[Command]) -> Vec<String> {
    commands
        .iter()
        .enumerate()
        .map(|(i, cmd)| format!("[{i}] {cmd}"))
        .collect()
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReportData {
    pub before_count: usize,
    pub after_count: usize,
    pub before_commands: Vec<String>,
    pub after_commands: Vec<String>,
    pub save_layer_log: Vec<String>,
}

impl ReportData {
    /// Sectioned plain-text form, parseable by [`ReportData::parse`].
    pub fn to_data_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("before_count: {}\n", self.before_count));
        out.push_str(&format!("after_count: {}\n", self.after_count));
        push_section(&mut out, SECTION_BEFORE, &self.before_commands);
        push_section(&mut out, SECTION_AFTER, &self.after_commands);
        push_section(&mut out, SECTION_LOG, &self.save_layer_log);
        out
    }

    pub fn parse(text: &str) -> LayerfoldResult<Self> {
        let mut before_count = None;
        let mut after_count = None;
        let mut sections: Vec<(String, Vec<String>)> = Vec::new();
        let mut current: Option<usize> = None;

        for line in text.lines() {
            if let Some(idx) = current {
                if line.starts_with(SECTION_END_PREFIX) {
                    current = None;
                } else {
                    sections[idx].1.push(line.to_string());
                }
                continue;
            }

            if let Some(rest) = line.strip_prefix("before_count:") {
                before_count = Some(parse_count(rest)?);
            } else if let Some(rest) = line.strip_prefix("after_count:") {
                after_count = Some(parse_count(rest)?);
            } else if let Some(rest) = line.strip_prefix(SECTION_PREFIX) {
                let header = rest.strip_suffix(SECTION_SUFFIX).ok_or_else(|| {
                    LayerfoldError::serde(format!("malformed section header: {line}"))
                })?;
                sections.push((header.to_string(), Vec::new()));
                current = Some(sections.len() - 1);
            } else if line.trim().is_empty() {
                continue;
            } else {
                return Err(LayerfoldError::serde(format!(
                    "unexpected line in report data: {line}"
                )));
            }
        }

        if current.is_some() {
            return Err(LayerfoldError::serde("unterminated section in report data"));
        }

        let take = |name: &str| -> LayerfoldResult<Vec<String>> {
            sections
                .iter()
                .find(|(header, _)| header == name)
                .map(|(_, lines)| lines.clone())
                .ok_or_else(|| {
                    LayerfoldError::serde(format!("missing section {name} in report data"))
                })
        };

        Ok(Self {
            before_count: before_count
                .ok_or_else(|| LayerfoldError::serde("missing before_count in report data"))?,
            after_count: after_count
                .ok_or_else(|| LayerfoldError::serde("missing after_count in report data"))?,
            before_commands: take(SECTION_BEFORE)?,
            after_commands: take(SECTION_AFTER)?,
            save_layer_log: take(SECTION_LOG)?,
        })
    }

    /// Self-contained HTML report. Image paths, when given, are emitted
    /// verbatim as `src` attributes.
    pub fn to_html(&self, before_image: Option<&str>, after_image: Option<&str>) -> String {
        let before = html_block(
            &format!(
                "Record Commands Before Transform ({} total)",
                self.before_count
            ),
            &self.before_commands.join("\n"),
        );
        let after = html_block(
            &format!(
                "Record Commands After Transform ({} total)",
                self.after_count
            ),
            &self.after_commands.join("\n"),
        );
        let diff = html_block(
            "Record Command Diff",
            &line_diff(&self.before_commands, &self.after_commands),
        );
        let log = html_block("SaveLayer / Restore Log", &self.save_layer_log.join("\n"));

        let mut images = String::new();
        if before_image.is_some() || after_image.is_some() {
            images.push_str("<h1>Record Snapshots</h1>\n");
            if let Some(src) = before_image {
                images.push_str(&format!(
                    "<h2>Before</h2><img src=\"{}\" alt=\"Before transform\" />\n",
                    html_escape(src)
                ));
            }
            if let Some(src) = after_image {
                images.push_str(&format!(
                    "<h2>After</h2><img src=\"{}\" alt=\"After transform\" />\n",
                    html_escape(src)
                ));
            }
        }

        format!(
            "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\" />\n\
             <title>Scene Comparison</title>\n\
             <style>body{{font-family:monospace;}}pre{{background:#f4f4f4;padding:1em;overflow:auto;}}\
             img{{max-width:100%;height:auto;}}h1{{font-size:1.5em;}}h2{{font-size:1.2em;}}</style>\n\
             </head><body>\n{before}\n{after}\n{diff}\n{log}\n{images}</body></html>\n"
        )
    }
}

fn push_section(out: &mut String, name: &str, lines: &[String]) {
    out.push_str(&format!("{SECTION_PREFIX}{name}{SECTION_SUFFIX}\n"));
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(&format!("{SECTION_END_PREFIX}{name}{SECTION_SUFFIX}\n"));
}

fn parse_count(rest: &str) -> LayerfoldResult<usize> {
    rest.trim()
        .parse()
        .map_err(|_| LayerfoldError::serde(format!("malformed count: {}", rest.trim())))
}

/// Minimal unified diff (single hunk, full context) built on a longest
/// common subsequence table. Command listings are small, so the quadratic
/// table is fine.
fn line_diff(before: &[String], after: &[String]) -> String {
    let n = before.len();
    let m = after.len();
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if before[i] == after[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut out = vec!["--- before".to_string(), "+++ after".to_string()];
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if before[i] == after[j] {
            out.push(format!(" {}", before[i]));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            out.push(format!("-{}", before[i]));
            i += 1;
        } else {
            out.push(format!("+{}", after[j]));
            j += 1;
        }
    }
    while i < n {
        out.push(format!("-{}", before[i]));
        i += 1;
    }
    while j < m {
        out.push(format!("+{}", after[j]));
        j += 1;
    }
    out.join("\n")
}

fn html_block(title: &str, body: &str) -> String {
    format!(
        "<h1>{}</h1>\n<pre>{}</pre>\n",
        html_escape(title),
        html_escape(body)
    )
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Rect, Rgba8};
    use crate::model::Paint;

    fn sample() -> ReportData {
        ReportData {
            before_count: 3,
            after_count: 3,
            before_commands: vec![
                "[0] SaveLayer(no paint)".to_string(),
                "[1] DrawRect([0, 0, 8, 8], #000000ff SrcOver)".to_string(),
                "[2] Restore".to_string(),
            ],
            after_commands: vec![
                "[0] Save".to_string(),
                "[1] DrawRect([0, 0, 8, 8], #000000ff SrcOver)".to_string(),
                "[2] Restore".to_string(),
            ],
            save_layer_log: vec!["collapsed SaveLayer at 0 (restore at 2)".to_string()],
        }
    }

    #[test]
    fn data_text_roundtrips() {
        let data = sample();
        let text = data.to_data_text();
        assert_eq!(ReportData::parse(&text).unwrap(), data);
    }

    #[test]
    fn parse_rejects_unterminated_section() {
        let text = "before_count: 0\nafter_count: 0\n-----BEGIN BEFORE COMMANDS-----\n";
        assert!(ReportData::parse(text).is_err());
    }

    #[test]
    fn parse_rejects_missing_section() {
        let mut data = sample();
        data.save_layer_log.clear();
        let text = data
            .to_data_text()
            .replace("-----BEGIN SAVE LAYER LOG-----\n", "")
            .replace("-----END SAVE LAYER LOG-----\n", "");
        assert!(ReportData::parse(&text).is_err());
    }

    #[test]
    fn parse_rejects_stray_lines() {
        let text = "before_count: 0\nwhat is this\n";
        assert!(ReportData::parse(text).is_err());
    }

    #[test]
    fn diff_marks_only_the_rewritten_line() {
        let data = sample();
        let diff = line_diff(&data.before_commands, &data.after_commands);
        assert!(diff.contains("-[0] SaveLayer(no paint)"));
        assert!(diff.contains("+[0] Save"));
        assert!(diff.contains(" [2] Restore"));
    }

    #[test]
    fn html_contains_all_sections_and_escapes() {
        let html = sample().to_html(Some("before.png"), Some("a<b.png"));
        assert!(html.contains("Record Commands Before Transform (3 total)"));
        assert!(html.contains("Record Command Diff"));
        assert!(html.contains("SaveLayer / Restore Log"));
        assert!(html.contains("a&lt;b.png"));
    }

    #[test]
    fn listing_is_index_prefixed() {
        let commands = vec![
            Command::Save,
            Command::DrawRect {
                rect: Rect::new(0.0, 0.0, 1.0, 1.0),
                paint: Paint::solid(Rgba8::BLACK),
            },
        ];
        let listing = command_listing(&commands);
        assert_eq!(listing[0], "[0] Save");
        assert!(listing[1].starts_with("[1] DrawRect("));
    }
}
