//! WikidPad markup to Markdown rewrite pipeline.
//!
//! The conversion is a fixed sequence of whole-text regex rewrites. Each stage
//! sees the output of the stage before it, so later stages can match text the
//! earlier ones produced; the order in [`PIPELINE`] is part of the contract.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static HEADING_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(\++)\s*(.+)$").expect("built-in pattern must compile"));
static BOLD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.*?)\*\*").expect("built-in pattern must compile"));
static ITALIC_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"//(.*?)//").expect("built-in pattern must compile"));
static ANCHOR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"anchor:\s*(\S+)").expect("built-in pattern must compile"));
static ANCHORED_LINK_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(.*?)\]!(\S+)").expect("built-in pattern must compile"));
static TITLED_LINK_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^#]*?)\|(.*?)\]").expect("built-in pattern must compile"));
static BARE_LINK_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^#]*?)\]").expect("built-in pattern must compile"));
static BULLET_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(\*+)\s+(.*)$").expect("built-in pattern must compile"));
static INDENTED_MARKER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(\s+)([*\d])").expect("built-in pattern must compile"));
static HORIZONTAL_RULE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^----+$").expect("built-in pattern must compile"));
static TABLE_FRAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(<<\|\s*|>>\s*)\n").expect("built-in pattern must compile"));
static TABLE_ROW_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(.*\|.*\|.*)$").expect("built-in pattern must compile"));
static NUMBERED_BULLET_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*\*\s*\d+\s*").expect("built-in pattern must compile"));
static BRACKET_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[.*?\]").expect("built-in pattern must compile"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Headings,
    Emphasis,
    Anchors,
    Links,
    Bullets,
    ListIndentation,
    HorizontalRules,
    Tables,
    ResidualCleanup,
    Finalize,
}

/// Stages in the order they run.
pub const PIPELINE: [Stage; 10] = [
    Stage::Headings,
    Stage::Emphasis,
    Stage::Anchors,
    Stage::Links,
    Stage::Bullets,
    Stage::ListIndentation,
    Stage::HorizontalRules,
    Stage::Tables,
    Stage::ResidualCleanup,
    Stage::Finalize,
];

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Headings => "headings",
            Self::Emphasis => "emphasis",
            Self::Anchors => "anchors",
            Self::Links => "links",
            Self::Bullets => "bullets",
            Self::ListIndentation => "list-indentation",
            Self::HorizontalRules => "horizontal-rules",
            Self::Tables => "tables",
            Self::ResidualCleanup => "residual-cleanup",
            Self::Finalize => "finalize",
        }
    }

    /// Runs this stage alone over `text`.
    pub fn apply(self, text: &str) -> String {
        match self {
            Self::Headings => rewrite_headings(text),
            Self::Emphasis => rewrite_emphasis(text),
            Self::Anchors => rewrite_anchors(text),
            Self::Links => rewrite_links(text),
            Self::Bullets => rewrite_bullets(text),
            Self::ListIndentation => reindent_list_markers(text),
            Self::HorizontalRules => rewrite_horizontal_rules(text),
            Self::Tables => rewrite_tables(text),
            Self::ResidualCleanup => strip_residual_markup(text),
            Self::Finalize => finalize(text),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformOptions {
    /// Delete wiki constructs the rewrite stages left behind.
    pub strip_residual: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Transformer {
    options: TransformOptions,
}

impl Transformer {
    pub fn new(options: TransformOptions) -> Self {
        Self { options }
    }

    /// Stages this transformer runs, in order.
    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        PIPELINE
            .into_iter()
            .filter(|stage| *stage != Stage::ResidualCleanup || self.options.strip_residual)
    }

    pub fn transform(&self, source: &str) -> String {
        self.stages()
            .fold(source.to_string(), |text, stage| stage.apply(&text))
    }
}

/// Converts WikidPad source text into Markdown.
///
/// Never fails: anything the stages do not recognize passes through unchanged
/// (or is deleted by the residual cleanup when `strip_residual` is set).
pub fn wikidpad_to_markdown(source: &str, strip_residual: bool) -> String {
    Transformer::new(TransformOptions { strip_residual }).transform(source)
}

fn rewrite_headings(text: &str) -> String {
    HEADING_PATTERN
        .replace_all(text, |caps: &Captures| {
            format!("{} {}", "#".repeat(caps[1].len()), &caps[2])
        })
        .into_owned()
}

fn rewrite_emphasis(text: &str) -> String {
    let bold = BOLD_PATTERN.replace_all(text, "**${1}**");
    ITALIC_PATTERN.replace_all(&bold, "_${1}_").into_owned()
}

fn rewrite_anchors(text: &str) -> String {
    let anchors = ANCHOR_PATTERN.replace_all(text, r#"<a name="${1}"></a>"#);
    ANCHORED_LINK_PATTERN
        .replace_all(&anchors, "[${1}#${2}]")
        .into_owned()
}

fn rewrite_links(text: &str) -> String {
    // Titled links first: the bare pattern would also match `[address|title]`.
    let titled = TITLED_LINK_PATTERN.replace_all(text, "[${2}](${1})");
    BARE_LINK_PATTERN.replace_all(&titled, "[${1}]").into_owned()
}

fn rewrite_bullets(text: &str) -> String {
    BULLET_PATTERN.replace_all(text, "${1} ${2}").into_owned()
}

fn reindent_list_markers(text: &str) -> String {
    INDENTED_MARKER_PATTERN
        .replace_all(text, |caps: &Captures| {
            let width = nested_indent_width(caps[1].chars().count());
            format!("{}{}", " ".repeat(width), &caps[2])
        })
        .into_owned()
}

/// Indentation for a nested list marker preceded by `whitespace` characters.
///
/// Computed as `(2 * whitespace) / 4 - 1`, floored at zero. Anything under four
/// characters ends up flush left, and 6 or 7 characters give two spaces.
pub fn nested_indent_width(whitespace: usize) -> usize {
    (2 * whitespace / 4).saturating_sub(1)
}

fn rewrite_horizontal_rules(text: &str) -> String {
    HORIZONTAL_RULE_PATTERN.replace_all(text, "---").into_owned()
}

fn rewrite_tables(text: &str) -> String {
    let unframed = TABLE_FRAME_PATTERN.replace_all(text, "");
    let rows = TABLE_ROW_PATTERN
        .replace_all(&unframed, |caps: &Captures| format_table_row(&caps[0]));
    insert_header_separators(&rows)
}

fn format_table_row(line: &str) -> String {
    let cells = line.split('|').map(str::trim).collect::<Vec<_>>();
    format!("| {} |", cells.join(" | "))
}

fn is_table_row(line: &str) -> bool {
    line.len() >= 2 && line.starts_with('|') && line.ends_with('|')
}

/// Adds a `| -- | -- |` separator after the first row of every run of
/// consecutive table rows.
fn insert_header_separators(text: &str) -> String {
    let mut output = String::with_capacity(text.len() + 32);
    let mut in_block = false;
    for line in text.split_inclusive('\n') {
        let content = line.strip_suffix('\n').unwrap_or(line);
        let is_row = is_table_row(content);

        output.push_str(line);
        if is_row && !in_block {
            let columns = content.matches('|').count().saturating_sub(1);
            let separator = format!("{}|", "| -- ".repeat(columns));
            if line.ends_with('\n') {
                output.push_str(&separator);
                output.push('\n');
            } else {
                output.push('\n');
                output.push_str(&separator);
            }
        }
        in_block = is_row;
    }
    output
}

fn strip_residual_markup(text: &str) -> String {
    let markers = NUMBERED_BULLET_PATTERN.replace_all(text, "");
    let anchors = markers.replace("anchor:", "");
    BRACKET_PATTERN.replace_all(&anchors, "").into_owned()
}

fn finalize(text: &str) -> String {
    text.trim().replace("\r\n", "\n")
}
