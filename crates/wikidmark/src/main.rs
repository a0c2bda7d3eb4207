use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::{Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use wikidmark_core::config::{ToolConfig, load_config};
use wikidmark_core::confluence::{ConfluenceClient, ConfluenceSettings, PagePublisher};
use wikidmark_core::convert::{ConversionReport, ConvertRequest, Verification, run_conversion};
use wikidmark_core::diff::{DEFAULT_WIDTH, DiffOptions, diff_texts};
use wikidmark_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, init_layout,
    normalize_for_display, resolve_paths,
};
use wikidmark_core::transform::wikidpad_to_markdown;

#[derive(Debug, Parser)]
#[command(
    name = "wikidmark",
    version,
    about = "Convert WikidPad pages to Markdown, verify them and publish to Confluence"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH", help = "Log file (reset on every run)")]
    log_file: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    log_file: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            log_file: cli.log_file.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Convert WikidPad files to Markdown
    Convert(ConvertArgs),
    /// Print the Markdown conversion of a single file
    Transform(TransformArgs),
    /// Side-by-side diff of two text files
    Diff(DiffArgs),
    /// Create .wikidmark/config.toml
    Init(InitArgs),
}

#[derive(Debug, Args)]
struct ConvertArgs {
    #[arg(
        short = 'w',
        long = "wikidpad",
        value_name = "GLOB",
        help = "Input WikidPad files (may be a glob)"
    )]
    wikidpad: Option<String>,
    #[arg(
        short = 'o',
        long = "out",
        value_name = "DIR",
        help = "Output directory for generated Markdown files"
    )]
    out: Option<PathBuf>,
    #[arg(
        short = 'V',
        long,
        help = "Verify each result against the .md file next to its source"
    )]
    verify: bool,
    #[arg(short = 'R', long, help = "Render converted files to HTML as well")]
    render: bool,
    #[arg(short = 's', long, help = "Stop on the first verification mismatch")]
    strict: bool,
    #[arg(long, help = "Delete WikidPad markup left over after conversion")]
    strip_residual: bool,
    #[arg(long, value_name = "URL")]
    confluence_url: Option<String>,
    #[arg(long, value_name = "KEY")]
    confluence_space: Option<String>,
    #[arg(long, value_name = "USER")]
    confluence_user: Option<String>,
    #[arg(long, value_name = "ID")]
    confluence_parent_id: Option<String>,
    #[arg(long, value_name = "TOKEN")]
    confluence_token: Option<String>,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct TransformArgs {
    file: PathBuf,
    #[arg(long)]
    strip_residual: bool,
}

#[derive(Debug, Args)]
struct DiffArgs {
    expected: PathBuf,
    actual: PathBuf,
    #[arg(long, default_value_t = DEFAULT_WIDTH)]
    width: usize,
    #[arg(long, help = "Report added or removed blank lines too")]
    keep_whitespace_changes: bool,
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    let Some(command) = cli.command else {
        let mut command = Cli::command();
        command.print_help()?;
        println!();
        return Ok(());
    };

    let paths = resolve_runtime_paths(&runtime)?;
    let _guard = setup_logging(&paths.log_path)?;
    if runtime.diagnostics {
        println!("[diagnostics]\n{}\n", paths.diagnostics());
    }

    match command {
        Commands::Convert(args) => run_convert(&paths, args),
        Commands::Transform(args) => run_transform(args),
        Commands::Diff(args) => run_diff(args),
        Commands::Init(args) => run_init(&paths, args),
    }
}

fn run_convert(paths: &ResolvedPaths, args: ConvertArgs) -> Result<()> {
    let config = load_config(&paths.config_path)?;
    info!("== wikidpad to markdown ==");
    info!("working in {}", normalize_for_display(&paths.project_root));

    let output_dir = args
        .out
        .clone()
        .unwrap_or_else(|| PathBuf::from(config.output_dir()));
    let request = ConvertRequest {
        project_root: paths.project_root.clone(),
        source_pattern: args.wikidpad.clone().unwrap_or_else(|| config.source_glob()),
        output_dir: paths.project_path(&output_dir),
        strip_residual: args.strip_residual || config.convert.strip_residual,
        verify: args.verify || config.convert.verify,
        strict: args.strict || config.convert.strict,
        render_html: args.render || config.convert.render_html,
    };

    let client = confluence_settings(&args, &config)?
        .map(ConfluenceClient::new)
        .transpose()?;
    let publisher = client
        .as_ref()
        .map(|client| client as &dyn PagePublisher);

    let report = run_conversion(&request, publisher)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_conversion_report(&report);
    }
    Ok(())
}

fn confluence_settings(args: &ConvertArgs, config: &ToolConfig) -> Result<Option<ConfluenceSettings>> {
    ConfluenceSettings::from_parts(
        args.confluence_url.clone().or_else(|| config.confluence_url()),
        args.confluence_space
            .clone()
            .or_else(|| config.confluence_space()),
        args.confluence_user.clone().or_else(|| config.confluence_user()),
        args.confluence_token
            .clone()
            .or_else(|| config.confluence_api_token()),
        args.confluence_parent_id
            .clone()
            .or_else(|| config.confluence_parent_id()),
    )
}

fn print_conversion_report(report: &ConversionReport) {
    println!("conversion");
    println!("source_pattern: {}", report.source_pattern);
    println!("output_dir: {}", report.output_dir);
    for outcome in &report.files {
        println!("file: {} -> {}", outcome.source, outcome.markdown_path);
        if let Some(html_path) = &outcome.html_path {
            println!("  html: {html_path}");
        }
        match &outcome.verification {
            Verification::Skipped => {}
            Verification::Matched { reference } => println!("  verified: {reference}"),
            Verification::MissingReference { reference } => {
                println!("  verification: missing {reference}")
            }
            Verification::Mismatched {
                reference,
                differing_lines,
                diff,
            } => {
                println!("  verification: differs from {reference} on {differing_lines} lines");
                println!("{diff}");
            }
        }
        if let Some(page) = &outcome.published {
            println!("  confluence: {}", page.url);
        }
    }
    println!("converted: {}", report.converted);
    println!("matched: {}", report.matched);
    println!("mismatched: {}", report.mismatched);
    println!("missing_references: {}", report.missing_references);
    println!("published: {}", report.published);
}

fn run_transform(args: TransformArgs) -> Result<()> {
    let content = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    println!("{}", wikidpad_to_markdown(&content, args.strip_residual));
    Ok(())
}

fn run_diff(args: DiffArgs) -> Result<()> {
    let expected = fs::read_to_string(&args.expected)
        .with_context(|| format!("failed to read {}", args.expected.display()))?;
    let actual = fs::read_to_string(&args.actual)
        .with_context(|| format!("failed to read {}", args.actual.display()))?;

    let options = DiffOptions {
        width: args.width,
        skip_equal: true,
        skip_whitespace_changes: !args.keep_whitespace_changes,
        left_title: Some(normalize_for_display(&args.expected)),
        right_title: Some(normalize_for_display(&args.actual)),
        ..DiffOptions::default()
    };
    let report = diff_texts(&expected, &actual, &options);
    if !report.has_differences() {
        println!("no differences");
        return Ok(());
    }
    println!("{}", report.rendered);
    bail!(
        "{} differs from {} on {} lines",
        normalize_for_display(&args.actual),
        normalize_for_display(&args.expected),
        report.count
    );
}

fn run_init(paths: &ResolvedPaths, args: InitArgs) -> Result<()> {
    let report = init_layout(paths, &InitOptions { force: args.force })?;
    println!("Initialized wikidmark project");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("state_dir: {}", normalize_for_display(&paths.state_dir));
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", format_flag(report.wrote_config));
    Ok(())
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
        log_file: runtime.log_file.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

/// Console output on stderr at `RUST_LOG` (default info), everything from
/// this tool at debug into `log_path`. The guard flushes the file on drop.
fn setup_logging(log_path: &Path) -> Result<WorkerGuard> {
    if log_path.exists() {
        fs::remove_file(log_path)
            .with_context(|| format!("failed to reset {}", log_path.display()))?;
    }
    let directory = log_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(directory)
        .with_context(|| format!("failed to create {}", directory.display()))?;
    let file_name = log_path
        .file_name()
        .with_context(|| format!("log path has no file name: {}", log_path.display()))?;

    let file_appender = tracing_appender::rolling::never(directory, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let console_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("wikidmark=debug,wikidmark_core=debug"));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();
    Ok(guard)
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
