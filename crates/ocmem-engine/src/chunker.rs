//! Markdown chunker: heading-based splitting, frontmatter-aware line
//! numbering, content hashing, token estimation.
//!
//! `chunk_markdown` is a pure function; everything downstream (ids, dedup,
//! token budgets) is derived from its output and never recomputed elsewhere.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::frontmatter::{Document, Frontmatter};

/// Sections larger than this are re-split at paragraph boundaries.
pub const MAX_CHUNK_TOKENS: usize = 500;

/// Deterministic token estimate: ~4 bytes per token.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() + 3) / 4
}

/// First 16 hex chars of SHA-256 over the raw content. Collides only for
/// byte-identical content.
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Chunk id: 16 hex chars of SHA-256 over `uri:start:end:content_hash`.
pub fn chunk_id(uri: &str, start_line: usize, end_line: usize, content_hash: &str) -> String {
    let raw = format!("{uri}:{start_line}:{end_line}:{content_hash}");
    let digest = Sha256::digest(raw.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Structured session-summary sections recognized inside journal files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSection {
    Request,
    Learned,
    Completed,
    Next,
}

static SECTION_PATTERNS: LazyLock<Vec<(SessionSection, Regex)>> = LazyLock::new(|| {
    vec![
        (
            SessionSection::Request,
            Regex::new(r"(?i)^(#{0,6}\s*)?(请求|request)").unwrap(),
        ),
        (
            SessionSection::Learned,
            Regex::new(r"(?i)^(#{0,6}\s*)?(学到了什么|learned|what\s+.*learned)").unwrap(),
        ),
        (
            SessionSection::Completed,
            Regex::new(r"(?i)^(#{0,6}\s*)?(完成了什么|completed|what\s+.*completed)").unwrap(),
        ),
        (
            SessionSection::Next,
            Regex::new(r"(?i)^(#{0,6}\s*)?(下一步|next\s*steps?)").unwrap(),
        ),
    ]
});

/// Detect a structured session section from a heading text.
pub fn detect_session_section(heading: &str) -> Option<SessionSection> {
    let heading = heading.trim();
    SECTION_PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(heading))
        .map(|(kind, _)| *kind)
}

/// A contiguous slice of a Markdown file with computed metadata.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub content: String,
    pub uri: String,
    /// 1-based inclusive source line numbers (frontmatter included in the count).
    pub start_line: usize,
    pub end_line: usize,
    pub content_hash: String,
    /// Heading path the chunk belongs to, e.g. `"Session 14:30 > Learned"`.
    pub section: String,
    pub session_section: Option<SessionSection>,
    pub token_count: usize,
    /// Frontmatter of the source file, shared by all its chunks.
    pub meta: Frontmatter,
}

impl Chunk {
    pub fn id(&self) -> String {
        chunk_id(&self.uri, self.start_line, self.end_line, &self.content_hash)
    }
}

static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").unwrap());

fn parse_heading(line: &str) -> Option<(u8, &str)> {
    let caps = HEADING_RE.captures(line)?;
    let level = caps.get(1).unwrap().as_str().len() as u8;
    Some((level, caps.get(2).unwrap().as_str().trim()))
}

fn is_fence(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("~~~")
}

/// Split a Markdown document into chunks.
///
/// Heading levels 1-3 open a new section; deeper headings stay inside their
/// parent. The section label is the heading-stack path joined with `" > "`.
/// Sections that contain nothing but headings, fenced code, or whitespace
/// produce no chunks.
pub fn chunk_markdown(text: &str, uri: &str) -> Vec<Chunk> {
    let doc = Document::parse(text);
    let lines: Vec<&str> = doc.body.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }

    // (start index, end index exclusive, section path)
    let mut sections: Vec<(usize, usize, String)> = Vec::new();
    let mut stack: Vec<(u8, String)> = Vec::new();
    let mut current_start = 0usize;
    let mut current_path = String::new();
    let mut in_fence = false;

    for (i, line) in lines.iter().enumerate() {
        if is_fence(line) {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if let Some((level, title)) = parse_heading(line) {
            if level <= 3 {
                if i > current_start {
                    sections.push((current_start, i, current_path.clone()));
                }
                while stack.last().is_some_and(|(l, _)| *l >= level) {
                    stack.pop();
                }
                stack.push((level, title.to_string()));
                current_path = stack
                    .iter()
                    .map(|(_, t)| t.as_str())
                    .collect::<Vec<_>>()
                    .join(" > ");
                current_start = i;
            }
        }
    }
    sections.push((current_start, lines.len(), current_path));

    let mut chunks = Vec::new();
    for (start, end, path) in sections {
        emit_section(
            &lines[start..end],
            start,
            &path,
            &doc,
            uri,
            &mut chunks,
        );
    }
    chunks
}

/// Emit zero or more chunks for one section.
fn emit_section(
    section_lines: &[&str],
    section_offset: usize,
    path: &str,
    doc: &Document,
    uri: &str,
    chunks: &mut Vec<Chunk>,
) {
    if !is_substantive(section_lines) {
        return;
    }

    // Tighten the extent to the non-blank range.
    let first = match section_lines.iter().position(|l| !l.trim().is_empty()) {
        Some(i) => i,
        None => return,
    };
    let last = section_lines
        .iter()
        .rposition(|l| !l.trim().is_empty())
        .unwrap();

    let session = section_session_kind(path, section_lines);

    let content = section_lines[first..=last].join("\n");
    let tokens = estimate_tokens(&content);

    if tokens <= MAX_CHUNK_TOKENS {
        push_chunk(
            chunks,
            content,
            uri,
            doc,
            path,
            session,
            doc.body_start_line + section_offset + first,
            doc.body_start_line + section_offset + last,
        );
        return;
    }

    // Too large: regroup at paragraph boundaries.
    for (para_lines, para_first, para_last) in
        paragraph_groups(&section_lines[first..=last], first)
    {
        if !is_substantive(&para_lines.lines().collect::<Vec<_>>()) {
            continue;
        }
        push_chunk(
            chunks,
            para_lines,
            uri,
            doc,
            path,
            session,
            doc.body_start_line + section_offset + para_first,
            doc.body_start_line + section_offset + para_last,
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn push_chunk(
    chunks: &mut Vec<Chunk>,
    content: String,
    uri: &str,
    doc: &Document,
    path: &str,
    session: Option<SessionSection>,
    start_line: usize,
    end_line: usize,
) {
    let hash = content_hash(&content);
    let tokens = estimate_tokens(&content);
    chunks.push(Chunk {
        content,
        uri: uri.to_string(),
        start_line,
        end_line,
        content_hash: hash,
        section: path.to_string(),
        session_section: session,
        token_count: tokens,
        meta: doc.meta.clone(),
    });
}

/// Does the section contain anything besides headings, fences, and blanks?
fn is_substantive(lines: &[&str]) -> bool {
    let mut in_fence = false;
    for line in lines {
        if is_fence(line) {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        let t = line.trim();
        if t.is_empty() || parse_heading(line).is_some() {
            continue;
        }
        return true;
    }
    false
}

fn section_session_kind(path: &str, lines: &[&str]) -> Option<SessionSection> {
    if let Some(last) = path.rsplit(" > ").next() {
        if let Some(kind) = detect_session_section(last) {
            return Some(kind);
        }
    }
    for line in lines {
        let t = line.trim();
        if t.starts_with('#') {
            if let Some(kind) = detect_session_section(t.trim_start_matches('#').trim()) {
                return Some(kind);
            }
        }
    }
    None
}

/// Group section lines into budget-sized paragraph runs.
///
/// Returns `(content, first_index, last_index)` per group, indices relative
/// to the slice passed to `emit_section` (then shifted by the caller).
fn paragraph_groups(lines: &[&str], base: usize) -> Vec<(String, usize, usize)> {
    // Collect paragraphs: runs of non-blank lines.
    let mut paragraphs: Vec<(usize, usize)> = Vec::new();
    let mut start: Option<usize> = None;
    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            if let Some(s) = start.take() {
                paragraphs.push((s, i - 1));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        paragraphs.push((s, lines.len() - 1));
    }

    let mut groups: Vec<(String, usize, usize)> = Vec::new();
    let mut acc: Vec<(usize, usize)> = Vec::new();
    let mut acc_tokens = 0usize;

    let flush = |acc: &mut Vec<(usize, usize)>, groups: &mut Vec<(String, usize, usize)>| {
        if acc.is_empty() {
            return;
        }
        let first = acc[0].0;
        let last = acc[acc.len() - 1].1;
        let content = acc
            .iter()
            .map(|&(s, e)| lines[s..=e].join("\n"))
            .collect::<Vec<_>>()
            .join("\n\n");
        groups.push((content, base + first, base + last));
        acc.clear();
    };

    for (s, e) in paragraphs {
        let para_tokens = estimate_tokens(&lines[s..=e].join("\n"));
        if acc_tokens + para_tokens > MAX_CHUNK_TOKENS && !acc.is_empty() {
            flush(&mut acc, &mut groups);
            acc_tokens = 0;
        }
        acc.push((s, e));
        acc_tokens += para_tokens;
    }
    flush(&mut acc, &mut groups);
    groups
}
