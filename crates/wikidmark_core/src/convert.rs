use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::confluence::{PageDraft, PagePublisher, PublishedPage};
use crate::diff::{DiffOptions, diff_texts};
use crate::filesystem::{
    HTML_EXTENSION, MARKDOWN_EXTENSION, discover_sources, output_path, page_title, reference_path,
};
use crate::render::markdown_to_html;
use crate::runtime::normalize_for_display;
use crate::transform::wikidpad_to_markdown;

#[derive(Debug, Clone)]
pub struct ConvertRequest {
    /// Base for a relative `source_pattern`.
    pub project_root: PathBuf,
    pub source_pattern: String,
    pub output_dir: PathBuf,
    pub strip_residual: bool,
    /// Compare each result with the `.md` file next to its source.
    pub verify: bool,
    /// Fail on the first verification mismatch.
    pub strict: bool,
    pub render_html: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verification {
    Skipped,
    Matched {
        reference: String,
    },
    MissingReference {
        reference: String,
    },
    Mismatched {
        reference: String,
        differing_lines: usize,
        diff: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileOutcome {
    pub source: String,
    pub title: String,
    pub markdown_path: String,
    pub html_path: Option<String>,
    pub verification: Verification,
    pub published: Option<PublishedPage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionReport {
    pub source_pattern: String,
    pub output_dir: String,
    pub files: Vec<FileOutcome>,
    pub converted: usize,
    pub matched: usize,
    pub mismatched: usize,
    pub missing_references: usize,
    pub published: usize,
}

/// Converts every source matching the request's pattern, one file at a time.
pub fn run_conversion(
    request: &ConvertRequest,
    publisher: Option<&dyn PagePublisher>,
) -> Result<ConversionReport> {
    if !request.output_dir.exists() {
        info!(
            "output directory {} does not exist, creating it",
            normalize_for_display(&request.output_dir)
        );
    }
    fs::create_dir_all(&request.output_dir).with_context(|| {
        format!(
            "failed to create output directory {}",
            request.output_dir.display()
        )
    })?;

    let sources = discover_sources(&request.project_root, &request.source_pattern)?;
    info!(
        "found {} wikidpad files for {}",
        sources.len(),
        request.source_pattern
    );

    let mut files = Vec::with_capacity(sources.len());
    for source in &sources {
        files.push(convert_file(source, request, publisher)?);
    }

    let matched = files
        .iter()
        .filter(|outcome| matches!(outcome.verification, Verification::Matched { .. }))
        .count();
    let mismatched = files
        .iter()
        .filter(|outcome| matches!(outcome.verification, Verification::Mismatched { .. }))
        .count();
    let missing_references = files
        .iter()
        .filter(|outcome| {
            matches!(
                outcome.verification,
                Verification::MissingReference { .. }
            )
        })
        .count();
    let published = files
        .iter()
        .filter(|outcome| outcome.published.is_some())
        .count();

    info!("done.");
    Ok(ConversionReport {
        source_pattern: request.source_pattern.clone(),
        output_dir: normalize_for_display(&request.output_dir),
        converted: files.len(),
        files,
        matched,
        mismatched,
        missing_references,
        published,
    })
}

/// Converts one source file: transform, write, then the optional verify,
/// render and publish steps.
pub fn convert_file(
    source: &Path,
    request: &ConvertRequest,
    publisher: Option<&dyn PagePublisher>,
) -> Result<FileOutcome> {
    debug!("parsing {}", source.display());
    let content = fs::read_to_string(source)
        .with_context(|| format!("failed to read {}", source.display()))?;
    let markdown = wikidpad_to_markdown(&content, request.strip_residual);

    let title = page_title(source);
    let markdown_path = output_path(&request.output_dir, source, MARKDOWN_EXTENSION);
    debug!("writing {}", markdown_path.display());
    fs::write(&markdown_path, &markdown)
        .with_context(|| format!("failed to write {}", markdown_path.display()))?;
    info!(
        "{} -> {}",
        normalize_for_display(source),
        normalize_for_display(&markdown_path)
    );

    let verification = if request.verify {
        verify_against_reference(source, &markdown_path, &markdown, request.strict)?
    } else {
        Verification::Skipped
    };

    let html_path = if request.render_html {
        let html_path = output_path(&request.output_dir, source, HTML_EXTENSION);
        fs::write(&html_path, markdown_to_html(&markdown))
            .with_context(|| format!("failed to write {}", html_path.display()))?;
        info!(
            "{} -> {}",
            normalize_for_display(source),
            normalize_for_display(&html_path)
        );
        Some(normalize_for_display(&html_path))
    } else {
        None
    };

    let published = match publisher {
        Some(publisher) => {
            let page = publisher
                .publish(&PageDraft {
                    title: title.clone(),
                    body_markdown: markdown,
                })
                .with_context(|| format!("failed to publish {}", source.display()))?;
            info!(
                "confluence upload: {} -> {}",
                normalize_for_display(source),
                page.url
            );
            Some(page)
        }
        None => None,
    };

    Ok(FileOutcome {
        source: normalize_for_display(source),
        title,
        markdown_path: normalize_for_display(&markdown_path),
        html_path,
        verification,
        published,
    })
}

fn verify_against_reference(
    source: &Path,
    markdown_path: &Path,
    markdown: &str,
    strict: bool,
) -> Result<Verification> {
    let reference = reference_path(source);
    let reference_display = normalize_for_display(&reference);
    if !reference.is_file() {
        warn!("no reference {reference_display} to verify {} against", source.display());
        return Ok(Verification::MissingReference {
            reference: reference_display,
        });
    }

    let expected = fs::read_to_string(&reference)
        .with_context(|| format!("failed to read {}", reference.display()))?;
    let report = diff_texts(&expected, markdown, &DiffOptions::verification());
    if !report.has_differences() {
        debug!("{} matches {reference_display}", markdown_path.display());
        return Ok(Verification::Matched {
            reference: reference_display,
        });
    }

    warn!(
        "conversion for {} differs from {reference_display} on {} lines",
        normalize_for_display(markdown_path),
        report.count
    );
    if strict {
        warn!("\n{}", report.rendered);
        bail!(
            "strict mode: conversion of {} differs from {reference_display} on {} lines",
            normalize_for_display(source),
            report.count
        );
    }
    debug!("\n{}", report.rendered);

    Ok(Verification::Mismatched {
        reference: reference_display,
        differing_lines: report.count,
        diff: report.rendered,
    })
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use tempfile::tempdir;

    use super::*;

    const SAMPLE_WIKI: &str = include_str!("../tests/fixtures/main.wiki");
    const SAMPLE_MARKDOWN: &str = include_str!("../tests/fixtures/main.md");

    fn request(root: &Path) -> ConvertRequest {
        ConvertRequest {
            project_root: root.to_path_buf(),
            source_pattern: "pages/*.wiki".to_string(),
            output_dir: root.join("out"),
            strip_residual: false,
            verify: false,
            strict: false,
            render_html: false,
        }
    }

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, content).expect("write file");
    }

    #[derive(Default)]
    struct RecordingPublisher {
        pages: RefCell<Vec<PageDraft>>,
    }

    impl PagePublisher for RecordingPublisher {
        fn publish(&self, page: &PageDraft) -> Result<PublishedPage> {
            self.pages.borrow_mut().push(page.clone());
            Ok(PublishedPage {
                id: format!("id-{}", page.title),
                url: format!("https://example.org/wiki/{}", page.title),
                created: true,
            })
        }
    }

    struct FailingPublisher;

    impl PagePublisher for FailingPublisher {
        fn publish(&self, _page: &PageDraft) -> Result<PublishedPage> {
            bail!("confluence request failed with HTTP 401 Unauthorized")
        }
    }

    #[test]
    fn converts_every_matching_file() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        write(&root.join("pages/alpha.wiki"), "+ Alpha\n//note//");
        write(&root.join("pages/beta.wiki"), "++ Beta\n----");
        write(&root.join("pages/skip.txt"), "+ ignored");

        let report = run_conversion(&request(root), None).expect("run conversion");
        assert_eq!(report.converted, 2);
        assert_eq!(report.published, 0);
        assert_eq!(
            fs::read_to_string(root.join("out/alpha.md")).expect("alpha"),
            "# Alpha\n_note_"
        );
        assert_eq!(
            fs::read_to_string(root.join("out/beta.md")).expect("beta"),
            "## Beta\n---"
        );
        assert!(!root.join("out/skip.md").exists());
        assert!(
            report
                .files
                .iter()
                .all(|outcome| outcome.verification == Verification::Skipped)
        );
    }

    #[test]
    fn empty_pattern_match_still_creates_output_dir() {
        let temp = tempdir().expect("tempdir");
        let report = run_conversion(&request(temp.path()), None).expect("run conversion");
        assert_eq!(report.converted, 0);
        assert!(temp.path().join("out").is_dir());
    }

    #[test]
    fn verification_reports_match_mismatch_and_missing() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        write(&root.join("pages/main.wiki"), SAMPLE_WIKI);
        write(&root.join("pages/main.md"), SAMPLE_MARKDOWN);
        write(&root.join("pages/drift.wiki"), "+ Drift\nbody");
        write(&root.join("pages/drift.md"), "# Drift\nother body\n");
        write(&root.join("pages/lonely.wiki"), "+ Lonely");

        let mut request = request(root);
        request.verify = true;
        let report = run_conversion(&request, None).expect("run conversion");

        assert_eq!(report.converted, 3);
        assert_eq!(report.matched, 1);
        assert_eq!(report.mismatched, 1);
        assert_eq!(report.missing_references, 1);

        let drift = report
            .files
            .iter()
            .find(|outcome| outcome.title == "drift")
            .expect("drift outcome");
        match &drift.verification {
            Verification::Mismatched {
                differing_lines,
                diff,
                ..
            } => {
                assert_eq!(*differing_lines, 2);
                assert!(diff.contains("verification (expected)"));
                assert!(diff.contains("other body"));
            }
            other => panic!("unexpected verification {other:?}"),
        }
    }

    #[test]
    fn strict_mode_stops_on_mismatch() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        write(&root.join("pages/drift.wiki"), "+ Drift\nbody");
        write(&root.join("pages/drift.md"), "# Drift\nother body\n");

        let mut request = request(root);
        request.verify = true;
        request.strict = true;
        let error = run_conversion(&request, None).expect_err("strict must fail");
        let message = error.to_string();
        assert!(message.starts_with("strict mode: conversion of"));
        assert!(message.contains("drift.md"));
        assert!(message.ends_with("on 2 lines"));
    }

    #[test]
    fn rendering_writes_html_beside_markdown() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        write(&root.join("pages/page.wiki"), "+ Title\nname|value|note\nx|1|first");

        let mut request = request(root);
        request.render_html = true;
        let report = run_conversion(&request, None).expect("run conversion");

        let html = fs::read_to_string(root.join("out/page.html")).expect("html");
        assert!(html.contains("<h1>Title</h1>"));
        assert!(html.contains("<table>"));
        assert_eq!(
            report.files[0].html_path.as_deref(),
            Some(normalize_for_display(&root.join("out/page.html")).as_str())
        );
    }

    #[test]
    fn publisher_receives_each_page() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        write(&root.join("pages/alpha.wiki"), "+ Alpha");
        write(&root.join("pages/beta.wiki"), "+ Beta");

        let publisher = RecordingPublisher::default();
        let report = run_conversion(&request(root), Some(&publisher)).expect("run conversion");

        let pages = publisher.pages.borrow();
        assert_eq!(
            pages
                .iter()
                .map(|page| page.title.as_str())
                .collect::<Vec<_>>(),
            vec!["alpha", "beta"]
        );
        assert_eq!(pages[0].body_markdown, "# Alpha");
        assert_eq!(report.published, 2);
        assert_eq!(
            report.files[1].published.as_ref().map(|page| page.url.as_str()),
            Some("https://example.org/wiki/beta")
        );
    }

    #[test]
    fn publish_failure_names_the_source() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        write(&root.join("pages/alpha.wiki"), "+ Alpha");

        let error =
            run_conversion(&request(root), Some(&FailingPublisher)).expect_err("must fail");
        assert!(error.to_string().contains("failed to publish"));
        assert!(format!("{error:#}").contains("HTTP 401"));
        assert!(root.join("out/alpha.md").exists());
    }

    #[test]
    fn missing_source_file_is_an_error() {
        let temp = tempdir().expect("tempdir");
        let request = request(temp.path());
        let missing = temp.path().join("pages/none.wiki");
        let error = convert_file(&missing, &request, None).expect_err("must fail");
        assert!(error.to_string().contains("none.wiki"));
    }

    #[test]
    fn residual_markup_is_stripped_when_requested() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        write(&root.join("pages/page.wiki"), "anchor: top\n[Page]");
        fs::create_dir_all(root.join("out")).expect("create out");

        let mut request = request(root);
        request.strip_residual = true;
        convert_file(&root.join("pages/page.wiki"), &request, None).expect("convert");
        let markdown = fs::read_to_string(root.join("out/page.md")).expect("markdown");
        assert!(!markdown.contains('['));
    }
}
