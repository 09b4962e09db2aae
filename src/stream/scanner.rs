//! Tag scanner for the agent's response buffer.
//!
//! The scanner always runs over the whole buffer accumulated so far. A
//! fragment arriving later may close a tag that was still open on the
//! previous pass, so nothing is carried between calls.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::models::{ReviewedSource, Section, StepSection, StepSource, StepStatus};

/// Literals that open or close a section.
const SECTION_MARKERS: [&str; 12] = [
    "[PROGRESS:",
    "[/PROGRESS]",
    "[SEARCH]",
    "[/SEARCH]",
    "[REVIEWING:",
    "[/REVIEWING]",
    "[STEP ",
    "[/STEP]",
    "[FINAL_ANSWER]",
    "[/FINAL_ANSWER]",
    "[EDITABLE_OUTPUT]",
    "[/EDITABLE_OUTPUT]",
];

/// Literals that only report completion and carry no section.
const COMPLETION_MARKERS: [&str; 2] = ["[FINISHED]", "[SOURCES:"];

const CITATIONS_MARKER: &str = "=== CITATIONS ===";

static SECTION_MARKER: Lazy<AhoCorasick> = Lazy::new(|| {
    AhoCorasickBuilder::new()
        .match_kind(MatchKind::LeftmostFirst)
        .build(SECTION_MARKERS)
        .expect("marker automaton")
});

static CITATIONS_SUFFIX: Lazy<AhoCorasick> = Lazy::new(|| {
    AhoCorasickBuilder::new()
        .ascii_case_insensitive(true)
        .build([CITATIONS_MARKER])
        .expect("citations automaton")
});

static PROGRESS_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[PROGRESS:[ \t]*([^\]\n]*)\]").expect("progress header regex"));
static SEARCH_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[SEARCH\]").expect("search header regex"));
static REVIEW_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[REVIEWING:[ \t]*([^\]\n]*)\]").expect("review header regex"));
static STEP_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[STEP[ \t]+(\d+):[ \t]*([^\]\n]*)\]").expect("step header regex"));
static FINAL_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[FINAL_ANSWER\]").expect("final answer header regex"));
static EDITABLE_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[EDITABLE_OUTPUT\]").expect("editable header regex"));
static SOURCE_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[SOURCES:[ \t]*(\d+)[ \t]*\]").expect("source count regex"));
static COMPLETION_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[FINISHED\]|\[SOURCES:[ \t]*\d+[ \t]*\]").expect("completion tag regex")
});
static STEP_SOURCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[SOURCES:[ \t]*([^\]]*)\]").expect("step sources regex"));

/// Any opening marker. Bounds the body of an unclosed block.
static ANY_OPENER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\[(?:PROGRESS:|SEARCH\]|REVIEWING:|STEP[ \t]+\d+:|FINAL_ANSWER\]|EDITABLE_OUTPUT\]|FINISHED\]|SOURCES:[ \t]*\d+[ \t]*\])",
    )
    .expect("opener regex")
});

#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    /// Minimum trimmed length before untagged prose is promoted to the final
    /// answer while the stream is still open.
    pub min_answer_chars: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            min_answer_chars: 20,
        }
    }
}

/// A value paired with the byte offset of the marker that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located<T> {
    pub offset: usize,
    pub value: T,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// Progress, search, review and step sections in buffer order.
    pub blocks: Vec<Located<Section>>,
    pub final_answer: Option<Located<String>>,
    pub editable_output: Option<Located<String>>,
    pub finished_marker: bool,
    pub source_count: Option<u32>,
    /// The final answer came from untagged prose rather than a tag.
    pub promoted_raw_text: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    Closed,
    /// Unclosed and the last header of its kind.
    Tail,
    /// Unclosed, with a later header of the same kind.
    Interrupted,
}

/// One header occurrence and the body it governs.
struct RawBlock<'a> {
    offset: usize,
    caps: Captures<'a>,
    body: &'a str,
    state: BlockState,
}

impl RawBlock<'_> {
    fn cap(&self, i: usize) -> &str {
        self.caps.get(i).map(|m| m.as_str().trim()).unwrap_or_default()
    }

    /// Whether this block survives the pass and with which status.
    fn status(&self, streaming: bool) -> Option<StepStatus> {
        match (self.state, streaming) {
            (BlockState::Closed, _) => Some(StepStatus::Complete),
            (BlockState::Tail, true) => Some(StepStatus::Thinking),
            (BlockState::Interrupted, true) => None,
            (_, false) => Some(StepStatus::Complete),
        }
    }

    /// The body as it should be read; open bodies lose any half-written tag.
    fn text(&self) -> &str {
        match self.state {
            BlockState::Closed => self.body,
            _ => strip_partial_marker(self.body),
        }
    }
}

fn find_blocks<'a>(buffer: &'a str, header: &Regex, close: &str) -> Vec<RawBlock<'a>> {
    let mut blocks = Vec::new();
    let mut pos = 0;

    while let Some(caps) = header.captures_at(buffer, pos) {
        let (offset, body_start) = match caps.get(0) {
            Some(m) => (m.start(), m.end()),
            None => break,
        };
        let limit = header
            .find_at(buffer, body_start)
            .map(|m| m.start())
            .unwrap_or(buffer.len());

        let block = match buffer[body_start..limit].find(close) {
            Some(rel) => {
                pos = body_start + rel + close.len();
                RawBlock {
                    offset,
                    caps,
                    body: &buffer[body_start..body_start + rel],
                    state: BlockState::Closed,
                }
            }
            None => {
                pos = body_start;
                let end = ANY_OPENER
                    .find_at(buffer, body_start)
                    .map(|m| m.start())
                    .unwrap_or(buffer.len());
                let state = if limit < buffer.len() {
                    BlockState::Interrupted
                } else {
                    BlockState::Tail
                };
                RawBlock {
                    offset,
                    caps,
                    body: &buffer[body_start..end],
                    state,
                }
            }
        };

        if block.state == BlockState::Interrupted {
            log::debug!(
                "unclosed block at offset {} superseded by a later header",
                block.offset
            );
        }
        blocks.push(block);
    }

    blocks
}

/// Drops a half-written marker from the end of `text`, e.g. `"...[FINAL_AN"`
/// or `"...[STEP 3: Revi"`. Citation markers such as `"[12"` are prose and stay.
pub fn strip_partial_marker(text: &str) -> &str {
    let Some(open) = text.rfind('[') else {
        return text;
    };
    let tail = &text[open..];
    if tail.contains(']') {
        return text;
    }
    let is_marker = SECTION_MARKERS
        .iter()
        .chain(COMPLETION_MARKERS.iter())
        .any(|marker| marker.starts_with(tail) || tail.starts_with(marker));
    if is_marker { &text[..open] } else { text }
}

/// Cuts an inline citation listing (`=== CITATIONS ===`, any case) and
/// everything after it.
pub fn strip_citation_suffix(text: &str) -> &str {
    match CITATIONS_SUFFIX.find(text) {
        Some(m) => &text[..m.start()],
        None => text,
    }
}

/// Whether `buffer` holds any section marker, complete or not. `[FINISHED]`
/// and `[SOURCES: n]` alone don't count.
pub fn contains_section_marker(buffer: &str) -> bool {
    SECTION_MARKER.is_match(buffer)
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_progress(block: &RawBlock<'_>) -> Section {
    let mut time_remaining = None;
    let mut description = None;
    for line in block.text().lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("TIME:") {
            time_remaining = non_empty(rest);
        } else if let Some(rest) = line.strip_prefix("DESC:") {
            description = non_empty(rest);
        }
    }
    Section::Progress {
        status: block.cap(1).to_string(),
        time_remaining,
        description,
    }
}

fn parse_search(block: &RawBlock<'_>) -> Section {
    let queries = block
        .text()
        .lines()
        .filter_map(non_empty)
        .collect();
    Section::Search { queries }
}

fn parse_review(block: &RawBlock<'_>) -> Section {
    let sources: Vec<ReviewedSource> = block
        .text()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once('|') {
            Some((title, domain)) => ReviewedSource {
                title: title.trim().to_string(),
                domain: domain.trim().to_string(),
            },
            None => ReviewedSource {
                title: line.to_string(),
                domain: String::new(),
            },
        })
        .collect();
    let count = block.cap(1).parse().unwrap_or(sources.len());
    Section::Review { sources, count }
}

fn parse_step(block: &RawBlock<'_>, status: StepStatus) -> Option<Section> {
    let step_number: u32 = block.cap(1).parse().ok().filter(|n| *n >= 1)?;
    let raw = block.text();

    let mut urls = Vec::new();
    for caps in STEP_SOURCES.captures_iter(raw) {
        let list = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        if list.trim().chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        urls.extend(
            list.split('|')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(|url| StepSource {
                    url: url.to_string(),
                }),
        );
    }
    let body = STEP_SOURCES.replace_all(raw, "");

    Some(Section::Step(StepSection {
        step_number,
        title: block.cap(2).to_string(),
        body: body.trim().to_string(),
        sources: (!urls.is_empty()).then_some(urls),
        status,
    }))
}

/// Picks the last surviving block of a text-bodied tag and cleans its text.
fn last_text_block(
    buffer: &str,
    header: &Regex,
    close: &str,
    streaming: bool,
) -> Option<Located<String>> {
    find_blocks(buffer, header, close)
        .into_iter()
        .rev()
        .find(|block| block.status(streaming).is_some())
        .map(|block| Located {
            offset: block.offset,
            value: block.text().to_string(),
        })
}

/// Scans `buffer` for every tag kind. `streaming` is true while more
/// fragments may still arrive.
pub fn scan(buffer: &str, streaming: bool, options: &ScanOptions) -> ScanResult {
    let mut result = ScanResult {
        finished_marker: buffer.contains("[FINISHED]"),
        source_count: SOURCE_COUNT
            .captures_iter(buffer)
            .filter_map(|caps| caps.get(1)?.as_str().parse().ok())
            .last(),
        ..ScanResult::default()
    };

    if !contains_section_marker(buffer) {
        let prose = COMPLETION_TAG.replace_all(buffer, "");
        let text = strip_citation_suffix(strip_partial_marker(&prose)).trim();
        let threshold = if streaming { options.min_answer_chars } else { 0 };
        if !text.is_empty() && text.chars().count() > threshold {
            log::debug!("no tags in buffer, promoting {} chars of prose", text.len());
            result.final_answer = Some(Located {
                offset: 0,
                value: text.to_string(),
            });
            result.promoted_raw_text = true;
        }
        return result;
    }

    for block in find_blocks(buffer, &PROGRESS_HEADER, "[/PROGRESS]") {
        if block.status(streaming).is_some() {
            result.blocks.push(Located {
                offset: block.offset,
                value: parse_progress(&block),
            });
        }
    }
    for block in find_blocks(buffer, &SEARCH_HEADER, "[/SEARCH]") {
        if block.status(streaming).is_some() {
            result.blocks.push(Located {
                offset: block.offset,
                value: parse_search(&block),
            });
        }
    }
    for block in find_blocks(buffer, &REVIEW_HEADER, "[/REVIEWING]") {
        if block.status(streaming).is_some() {
            result.blocks.push(Located {
                offset: block.offset,
                value: parse_review(&block),
            });
        }
    }
    for block in find_blocks(buffer, &STEP_HEADER, "[/STEP]") {
        if let Some(section) = block
            .status(streaming)
            .and_then(|status| parse_step(&block, status))
        {
            result.blocks.push(Located {
                offset: block.offset,
                value: section,
            });
        }
    }
    result.blocks.sort_by_key(|located| located.offset);

    result.final_answer = last_text_block(buffer, &FINAL_HEADER, "[/FINAL_ANSWER]", streaming)
        .map(|located| Located {
            offset: located.offset,
            value: strip_citation_suffix(&located.value).trim().to_string(),
        });
    result.editable_output =
        last_text_block(buffer, &EDITABLE_HEADER, "[/EDITABLE_OUTPUT]", streaming).map(
            |located| Located {
                offset: located.offset,
                value: located.value.trim().to_string(),
            },
        );

    result
}
