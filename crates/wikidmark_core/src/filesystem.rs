use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use glob::{MatchOptions, Pattern, glob_with};
use walkdir::WalkDir;

pub const SOURCE_EXTENSION: &str = "wiki";
pub const MARKDOWN_EXTENSION: &str = "md";
pub const HTML_EXTENSION: &str = "html";

/// Finds WikidPad source files matching `pattern`.
///
/// `pattern` is resolved against `root` unless absolute and uses shell glob
/// syntax: `*`, `?`, `[...]` and `**` for any number of directories. Wildcards
/// do not match a leading dot. Without wildcards, a file path yields that file
/// and a directory yields every `.wiki` file below it. Missing paths yield an
/// empty list. Results are sorted.
pub fn discover_sources(root: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let trimmed = pattern.trim();
    if trimmed.is_empty() {
        bail!("source pattern is empty");
    }

    if !has_wildcard(trimmed) {
        let path = root.join(trimmed);
        let mut found = if path.is_file() {
            vec![path]
        } else if path.is_dir() {
            collect_sources_below(&path)?
        } else {
            Vec::new()
        };
        found.sort();
        return Ok(found);
    }

    let full_pattern = if Path::new(trimmed).is_absolute() {
        trimmed.to_string()
    } else {
        format!(
            "{}/{trimmed}",
            Pattern::escape(&root.to_string_lossy()).trim_end_matches('/')
        )
    };
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: true,
    };
    let entries = glob_with(&full_pattern, options)
        .with_context(|| format!("invalid source pattern: {trimmed}"))?;

    let mut found = Vec::new();
    for entry in entries {
        let path = entry.with_context(|| format!("failed to read a match of {trimmed}"))?;
        if path.is_file() {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

fn collect_sources_below(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry.with_context(|| format!("failed to walk {}", dir.display()))?;
        if entry.file_type().is_file() && has_source_extension(entry.path()) {
            found.push(entry.into_path());
        }
    }
    Ok(found)
}

fn has_wildcard(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

fn has_source_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|value| value.to_str())
        .map(|value| value.eq_ignore_ascii_case(SOURCE_EXTENSION))
        .unwrap_or(false)
}

/// Page title of a source file: its file name without the extension.
pub fn page_title(source: &Path) -> String {
    source
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `<output_dir>/<title>.<extension>`
pub fn output_path(output_dir: &Path, source: &Path, extension: &str) -> PathBuf {
    output_dir.join(format!("{}.{extension}", page_title(source)))
}

/// Reference Markdown expected next to the source: `page.wiki` -> `page.md`.
pub fn reference_path(source: &Path) -> PathBuf {
    source.with_extension(MARKDOWN_EXTENSION)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, "+ Page\n").expect("write file");
    }

    #[test]
    fn discovers_wiki_files_by_pattern() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        touch(&root.join("pages/alpha.wiki"));
        touch(&root.join("pages/beta.wiki"));
        touch(&root.join("pages/beta.md"));
        touch(&root.join("pages/nested/gamma.wiki"));

        let found = discover_sources(root, "pages/*.wiki").expect("discover");
        assert_eq!(
            found,
            vec![root.join("pages/alpha.wiki"), root.join("pages/beta.wiki")]
        );
    }

    #[test]
    fn double_star_descends_into_subdirectories() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        touch(&root.join("pages/alpha.wiki"));
        touch(&root.join("pages/nested/deeper/gamma.wiki"));

        let found = discover_sources(root, "pages/**/*.wiki").expect("discover");
        assert_eq!(
            found,
            vec![
                root.join("pages/alpha.wiki"),
                root.join("pages/nested/deeper/gamma.wiki"),
            ]
        );
    }

    #[test]
    fn plain_directory_and_file_patterns() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        touch(&root.join("pages/alpha.wiki"));
        touch(&root.join("pages/notes.txt"));
        touch(&root.join("pages/sub/beta.WIKI"));

        let from_dir = discover_sources(root, "pages").expect("discover dir");
        assert_eq!(
            from_dir,
            vec![root.join("pages/alpha.wiki"), root.join("pages/sub/beta.WIKI")]
        );

        let single = discover_sources(root, "pages/notes.txt").expect("discover file");
        assert_eq!(single, vec![root.join("pages/notes.txt")]);

        let absolute = root.join("pages/*.wiki").to_string_lossy().into_owned();
        let from_absolute = discover_sources(Path::new("/unused"), &absolute).expect("absolute");
        assert_eq!(from_absolute, vec![root.join("pages/alpha.wiki")]);
    }

    #[test]
    fn missing_base_yields_nothing() {
        let temp = tempdir().expect("tempdir");
        assert!(discover_sources(temp.path(), "nowhere/*.wiki")
            .expect("discover")
            .is_empty());
        assert!(discover_sources(temp.path(), "nowhere.wiki")
            .expect("discover")
            .is_empty());
        assert!(discover_sources(temp.path(), "  ").is_err());
    }

    #[test]
    fn character_classes_select_names() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        touch(&root.join("pages/alpha.wiki"));
        touch(&root.join("pages/beta.wiki"));
        touch(&root.join("pages/gamma.wiki"));

        let found = discover_sources(root, "pages/[ab]*.wiki").expect("discover");
        assert_eq!(
            found,
            vec![root.join("pages/alpha.wiki"), root.join("pages/beta.wiki")]
        );
    }

    #[test]
    fn wildcards_skip_hidden_names_and_stay_in_one_directory() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        touch(&root.join("pages/visible.wiki"));
        touch(&root.join("pages/.hidden.wiki"));
        touch(&root.join("pages/sub/nested.wiki"));

        let found = discover_sources(root, "pages/*.wiki").expect("discover");
        assert_eq!(found, vec![root.join("pages/visible.wiki")]);

        let dotted = discover_sources(root, "pages/.*.wiki").expect("discover dotted");
        assert_eq!(dotted, vec![root.join("pages/.hidden.wiki")]);
    }

    #[test]
    fn malformed_pattern_is_an_error() {
        let temp = tempdir().expect("tempdir");
        let error = discover_sources(temp.path(), "pages/***.wiki").expect_err("must fail");
        assert!(error.to_string().contains("invalid source pattern"));
    }

    #[test]
    fn derived_paths_use_the_page_title() {
        let source = Path::new("pages/wiki.wiki");
        assert_eq!(page_title(source), "wiki");
        assert_eq!(
            output_path(Path::new("out"), source, MARKDOWN_EXTENSION),
            PathBuf::from("out/wiki.md")
        );
        assert_eq!(
            output_path(Path::new("out"), source, HTML_EXTENSION),
            PathBuf::from("out/wiki.html")
        );
        assert_eq!(reference_path(source), PathBuf::from("pages/wiki.md"));
    }
}
