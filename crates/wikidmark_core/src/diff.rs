use serde::Serialize;
use similar::{Algorithm, ChangeTag, TextDiff};

pub const DEFAULT_WIDTH: usize = 78;
pub const DEFAULT_SEPARATOR: &str = " | ";

pub const EXPECTED_TITLE: &str = "verification (expected)";
pub const OBTAINED_TITLE: &str = "converted (obtained)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffOptions {
    /// Total character width of the side-by-side rendering.
    pub width: usize,
    pub skip_equal: bool,
    /// Ignore removed or inserted lines that are blank after trimming.
    pub skip_whitespace_changes: bool,
    pub separator: String,
    pub left_title: Option<String>,
    pub right_title: Option<String>,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            skip_equal: false,
            skip_whitespace_changes: false,
            separator: DEFAULT_SEPARATOR.to_string(),
            left_title: None,
            right_title: None,
        }
    }
}

impl DiffOptions {
    /// Settings used when checking converted pages against reference files.
    pub fn verification() -> Self {
        Self {
            skip_equal: true,
            skip_whitespace_changes: true,
            left_title: Some(EXPECTED_TITLE.to_string()),
            right_title: Some(OBTAINED_TITLE.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffReport {
    pub rendered: String,
    /// Number of lines that differ between the two inputs.
    pub count: usize,
}

impl DiffReport {
    pub fn has_differences(&self) -> bool {
        self.count > 0
    }
}

/// Side-by-side line diff of `left` against `right`.
///
/// Removed lines show on the left with an empty right column, inserted lines
/// the other way round. Lines wider than half the width are word-wrapped.
pub fn better_diff(left: &[&str], right: &[&str], options: &DiffOptions) -> DiffReport {
    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_slices(left, right);

    let mut rows = Vec::<(String, String)>::new();
    let mut count = 0usize;
    for change in diff.iter_all_changes() {
        let value = change.value();
        match change.tag() {
            ChangeTag::Equal => {
                if !options.skip_equal {
                    rows.push((value.to_string(), value.to_string()));
                }
            }
            ChangeTag::Delete => {
                if options.skip_whitespace_changes && value.trim().is_empty() {
                    continue;
                }
                rows.push((value.to_string(), String::new()));
                count += 1;
            }
            ChangeTag::Insert => {
                if options.skip_whitespace_changes && value.trim().is_empty() {
                    continue;
                }
                rows.push((String::new(), value.to_string()));
                count += 1;
            }
        }
    }

    if rows.is_empty() {
        return DiffReport::default();
    }

    DiffReport {
        rendered: side_by_side(&rows, options).join("\n"),
        count,
    }
}

/// Line-splitting convenience over [`better_diff`].
pub fn diff_texts(expected: &str, actual: &str, options: &DiffOptions) -> DiffReport {
    let left = expected.lines().collect::<Vec<_>>();
    let right = actual.lines().collect::<Vec<_>>();
    better_diff(&left, &right, options)
}

/// Width of one column for the given total width and separator.
pub fn column_width(width: usize, separator: &str) -> usize {
    let odd_adjust = 1 - width % 2;
    width
        .saturating_sub(separator.chars().count())
        .saturating_sub(odd_adjust)
        / 2
}

fn side_by_side(rows: &[(String, String)], options: &DiffOptions) -> Vec<String> {
    let separator = if options.separator.is_empty() {
        DEFAULT_SEPARATOR
    } else {
        options.separator.as_str()
    };
    let mid_width = column_width(options.width, separator);

    let mut pairs = Vec::new();
    if options.left_title.is_some() || options.right_title.is_some() {
        pairs.push((
            options.left_title.clone().unwrap_or_default(),
            options.right_title.clone().unwrap_or_default(),
        ));
        pairs.push(("-".repeat(mid_width), "-".repeat(mid_width)));
    }
    for (left, right) in rows {
        let left = wrap_line(left, mid_width);
        let right = wrap_line(right, mid_width);
        let height = left.len().max(right.len());
        for index in 0..height {
            pairs.push((
                left.get(index).cloned().unwrap_or_default(),
                right.get(index).cloned().unwrap_or_default(),
            ));
        }
    }

    pairs
        .into_iter()
        .map(|(left, right)| {
            let padding = mid_width.saturating_sub(left.chars().count());
            format!("{left}{}{separator}{right}", " ".repeat(padding))
        })
        .collect()
}

/// Greedy word wrap. Words longer than `width` stay on a line of their own.
fn wrap_line(line: &str, width: usize) -> Vec<String> {
    let line = line.trim_end();
    if width == 0 || line.chars().count() <= width {
        return vec![line.to_string()];
    }

    let indent_len = line.len() - line.trim_start().len();
    let mut lines = Vec::new();
    let mut current = line[..indent_len].to_string();
    let mut current_has_word = false;
    for word in line.split_whitespace() {
        let needed = if current_has_word {
            current.chars().count() + 1 + word.chars().count()
        } else {
            current.chars().count() + word.chars().count()
        };
        if current_has_word && needed > width {
            lines.push(std::mem::take(&mut current));
            current_has_word = false;
        }
        if current_has_word {
            current.push(' ');
        }
        current.push_str(word);
        current_has_word = true;
    }
    if current_has_word {
        lines.push(current);
    }
    lines
}
