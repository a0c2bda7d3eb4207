use std::sync::LazyLock;

use comrak::Options;
use regex::Regex;

fn render_options() -> Options<'static> {
    let mut options = Options::default();
    options.extension.table = true;
    options.extension.strikethrough = true;
    options.extension.autolink = true;
    // anchors emitted by the transformer are raw HTML
    options.render.unsafe_ = true;
    options
}

static NAMED_ANCHOR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<a name="([^"]*)"></a>"#).expect("built-in pattern must compile")
});

/// Renders converted Markdown to an HTML fragment.
pub fn markdown_to_html(markdown: &str) -> String {
    comrak::markdown_to_html(markdown, &render_options())
}

/// Renders Markdown to Confluence storage format.
///
/// Void elements are already self-closed by the renderer; named anchors are
/// replaced with the storage anchor macro so in-page links keep working.
pub fn markdown_to_storage_xhtml(markdown: &str) -> String {
    let html = markdown_to_html(markdown);
    NAMED_ANCHOR_PATTERN
        .replace_all(
            &html,
            r#"<ac:structured-macro ac:name="anchor"><ac:parameter ac:name="">${1}</ac:parameter></ac:structured-macro>"#,
        )
        .into_owned()
}
