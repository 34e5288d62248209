//! Markdown block scanner
//!
//! Splits canonical document text into sections (by ATX heading) and blocks.
//! Fenced code and stack traces come out as single blocks so the windowing
//! pass can treat them as atomic.

use std::sync::OnceLock;

use regex::Regex;

/// Section name used for content that precedes any heading
pub const ROOT_SECTION: &str = "root";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockKind {
    Heading,
    Fence,
    StackTrace,
    Paragraph,
}

impl BlockKind {
    pub(crate) fn is_atomic(self) -> bool {
        !matches!(self, BlockKind::Paragraph)
    }
}

/// A block is a byte range of the document text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Block {
    pub kind: BlockKind,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Section {
    pub path: Vec<String>,
    pub blocks: Vec<Block>,
}

impl Section {
    fn has_body(&self) -> bool {
        self.blocks.iter().any(|b| b.kind != BlockKind::Heading)
    }
}

fn stack_frame_regex() -> &'static Regex {
    static FRAME: OnceLock<Regex> = OnceLock::new();
    FRAME.get_or_init(|| {
        Regex::new(concat!(
            r"^(?:",
            r"\s*at\s+\S.*(?:\(.*:\d+(?::\d+)?\)|:\d+(?::\d+)?)\s*",
            // gecko: name@url-or-script:line:col
            r"|\s*[\w$.<>/\[\]-]*@",
            r"(?:[a-zA-Z][\w+.-]*://\S*|\S*\.(?:m?js|jsm|jsx|tsx?|html?|wasm)):\d+:\d+\s*",
            r#"|\s*File ".+", line \d+.*"#,
            r"|Traceback \(most recent call last\):\s*",
            r"|\s*#\d+\s+0x[0-9a-fA-F]+.*",
            r"|\s*\d+:\s+(?:0x[0-9a-fA-F]+|[\w<>]+::).*",
            r"|\s*(?:Caused by:|Exception in thread ).*",
            r")$"
        ))
        .expect("stack frame pattern is valid")
    })
}

pub(crate) fn is_stack_frame(line: &str) -> bool {
    stack_frame_regex().is_match(line)
}

/// Parse an ATX heading, returning its level and title.
pub(crate) fn parse_heading(line: &str) -> Option<(usize, String)> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 {
        return None;
    }
    let trimmed = &line[indent..];
    let level = trimmed.bytes().take_while(|&b| b == b'#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &trimmed[level..];
    if !rest.is_empty() && !rest.starts_with(' ') && !rest.starts_with('\t') {
        return None;
    }
    let title = rest.trim().trim_end_matches('#').trim_end().to_string();
    Some((level, title))
}

/// Returns the fence marker (char, run length) when `line` opens a fence.
fn fence_open(line: &str) -> Option<(char, usize)> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 {
        return None;
    }
    let rest = &line[indent..];
    let marker = rest.chars().next()?;
    if marker != '`' && marker != '~' {
        return None;
    }
    let run = rest.chars().take_while(|&c| c == marker).count();
    if run < 3 {
        return None;
    }
    // backtick info strings may not contain backticks
    if marker == '`' && rest[run..].contains('`') {
        return None;
    }
    Some((marker, run))
}

fn fence_closes(line: &str, (marker, run): (char, usize)) -> bool {
    let trimmed = line.trim();
    let len = trimmed.chars().take_while(|&c| c == marker).count();
    len >= run && trimmed.chars().all(|c| c == marker)
}

/// A line with its byte span in the document
#[derive(Debug, Clone, Copy)]
struct Line<'a> {
    text: &'a str,
    start: usize,
    end: usize,
}

fn lines_with_offsets(text: &str) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    let mut offset = 0;
    for raw in text.split('\n') {
        lines.push(Line {
            text: raw,
            start: offset,
            end: offset + raw.len(),
        });
        offset += raw.len() + 1;
    }
    lines
}

/// Split `text` into sections. Heading-only sections are folded forward into
/// the next section with a body so their titles stay in the chunk text.
pub(crate) fn parse_sections(text: &str) -> Vec<Section> {
    let lines = lines_with_offsets(text);
    let mut sections = Vec::new();
    let mut trail: Vec<(usize, String)> = Vec::new();
    let mut current = Section {
        path: vec![ROOT_SECTION.to_string()],
        blocks: Vec::new(),
    };
    let mut paragraph: Option<(usize, usize)> = None;

    let flush = |paragraph: &mut Option<(usize, usize)>, blocks: &mut Vec<Block>| {
        if let Some((start, end)) = paragraph.take() {
            blocks.push(Block {
                kind: BlockKind::Paragraph,
                start,
                end,
            });
        }
    };

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];

        if let Some(fence) = fence_open(line.text) {
            flush(&mut paragraph, &mut current.blocks);
            let mut j = i + 1;
            while j < lines.len() && !fence_closes(lines[j].text, fence) {
                j += 1;
            }
            let last = j.min(lines.len() - 1);
            current.blocks.push(Block {
                kind: BlockKind::Fence,
                start: line.start,
                end: lines[last].end,
            });
            i = last + 1;
            continue;
        }

        if let Some((level, title)) = parse_heading(line.text) {
            flush(&mut paragraph, &mut current.blocks);
            while trail.last().map(|(l, _)| *l >= level).unwrap_or(false) {
                trail.pop();
            }
            trail.push((level, title));

            let carried = if current.has_body() {
                sections.push(std::mem::take(&mut current));
                Vec::new()
            } else {
                std::mem::take(&mut current.blocks)
            };
            current = Section {
                path: trail.iter().map(|(_, t)| t.clone()).collect(),
                blocks: carried,
            };
            current.blocks.push(Block {
                kind: BlockKind::Heading,
                start: line.start,
                end: line.end,
            });
            i += 1;
            continue;
        }

        if is_stack_frame(line.text) {
            let mut j = i;
            let mut frames = 0;
            while j < lines.len() {
                let next = lines[j].text;
                if is_stack_frame(next) {
                    frames += 1;
                } else if j == i || next.trim().is_empty() || !next.starts_with(char::is_whitespace) {
                    break;
                }
                j += 1;
            }
            if frames >= 2 {
                flush(&mut paragraph, &mut current.blocks);
                current.blocks.push(Block {
                    kind: BlockKind::StackTrace,
                    start: line.start,
                    end: lines[j - 1].end,
                });
                i = j;
                continue;
            }
        }

        if line.text.trim().is_empty() {
            flush(&mut paragraph, &mut current.blocks);
        } else {
            paragraph = Some(match paragraph {
                Some((start, _)) => (start, line.end),
                None => (line.start, line.end),
            });
        }
        i += 1;
    }

    flush(&mut paragraph, &mut current.blocks);
    if !current.blocks.is_empty() {
        sections.push(current);
    }
    sections
}

impl Default for Section {
    fn default() -> Self {
        Section {
            path: vec![ROOT_SECTION.to_string()],
            blocks: Vec::new(),
        }
    }
}
