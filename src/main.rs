use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rgstream::config::{self, EngineConfig};
use rgstream::utils::{progress_message, search_spinner};
use rgstream::{OutputFormat, SearchEngine, SearchEvent, SearchStatus, logging, output};
use serde::Serialize;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::warn;

#[derive(Parser)]
#[command(name = "rgstream")]
#[command(about = "Stream ripgrep results into a batched, memory-bounded index")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a search and print the results
    Search(SearchArgs),
    /// Show the effective configuration
    Config {
        /// Only print the config file location
        #[arg(long)]
        path: bool,
    },
}

#[derive(clap::Args)]
struct SearchArgs {
    /// Pattern to search for
    pattern: String,

    /// Directory or file to search
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Case insensitive search
    #[arg(short = 'i', long)]
    ignore_case: bool,

    /// Only match whole words
    #[arg(short = 'w', long)]
    word_regexp: bool,

    /// Treat the pattern as a literal string
    #[arg(short = 'F', long)]
    fixed_strings: bool,

    /// Lines of context around each match
    #[arg(short = 'C', long)]
    context: Option<u32>,

    /// Only search files of this type (ripgrep type names)
    #[arg(short = 't', long = "type")]
    file_types: Vec<String>,

    /// Skip paths matching this glob
    #[arg(short = 'g', long = "exclude")]
    excludes: Vec<String>,

    /// Maximum directory depth
    #[arg(long)]
    max_depth: Option<u32>,

    /// Follow symbolic links
    #[arg(short = 'L', long)]
    follow: bool,

    /// Search hidden files and directories
    #[arg(long)]
    hidden: bool,

    /// Stop after this many matches
    #[arg(short = 'm', long)]
    max_results: Option<usize>,

    /// Output format requested from ripgrep
    #[arg(long)]
    format: Option<OutputFormat>,

    /// ripgrep executable to run
    #[arg(long)]
    rg: Option<String>,

    /// Print an export instead of matches
    #[arg(long, value_enum)]
    export: Option<ExportFormat>,

    /// Only print the paths with matches
    #[arg(short = 'l', long)]
    files_with_matches: bool,

    /// Print match counts per file
    #[arg(short = 'c', long)]
    count: bool,

    /// Group matches under a file name heading
    #[arg(long)]
    heading: bool,

    /// Disable colors
    #[arg(long)]
    no_color: bool,

    /// Show a progress spinner on stderr
    #[arg(long)]
    progress: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Text,
    Csv,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let result = match cli.command {
        Commands::Search(args) => run_search(args),
        Commands::Config { path } => show_config(path).map(|_| ExitCode::SUCCESS),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("rgstream: {:#}", e);
            ExitCode::from(2)
        }
    }
}

fn run_search(args: SearchArgs) -> Result<ExitCode> {
    let mut config = EngineConfig::load();
    if let Some(rg) = args.rg {
        config.executable = rg;
    }
    if let Some(format) = args.format {
        config.output_format = format;
    }

    let mut params = config.parameters(args.pattern, args.path);
    params.case_sensitive = !args.ignore_case;
    params.whole_word = args.word_regexp;
    params.regex = !args.fixed_strings;
    params.follow_symlinks = args.follow;
    params.include_hidden = args.hidden;
    params.max_depth = args.max_depth;
    params.file_types.extend(args.file_types);
    params.exclude_globs.extend(args.excludes);
    if let Some(context) = args.context {
        params.context_lines = context;
    }
    if let Some(max) = args.max_results {
        params.max_results = max;
    }

    let mut engine = SearchEngine::new(config);
    let session = engine.start(params).context("Failed to start search")?;

    let spinner = search_spinner(args.progress && std::io::stderr().is_terminal());
    spinner.set_message("searching");
    for event in session.events() {
        match event {
            SearchEvent::Progress(progress) => spinner.set_message(progress_message(&progress)),
            SearchEvent::ResourceWarning(warning) => warn!(%warning, "memory ceiling exceeded"),
            SearchEvent::Finished(_) => break,
            SearchEvent::Batch(_) => {}
        }
    }
    let summary = session.wait();
    spinner.finish_and_clear();

    let index = session.index();
    let color = !args.no_color;
    match args.export {
        Some(ExportFormat::Text) => print!("{}", index.export_text()?),
        Some(ExportFormat::Csv) => print!("{}", index.export_csv()?),
        Some(ExportFormat::Json) => println!("{}", index.export_json()?),
        None => {
            let index = index.read();
            if args.files_with_matches {
                output::print_files_only(index.all(), color)?;
            } else if args.count {
                output::print_match_counts(index.all(), color)?;
            } else {
                output::print_results(index.all(), color, args.heading)?;
            }
        }
    }

    if summary.truncated {
        eprintln!(
            "rgstream: stopped after {} matches (--max-results)",
            summary.total_matches
        );
    }
    if summary.skipped_records > 0 {
        eprintln!(
            "rgstream: skipped {} unreadable output records",
            summary.skipped_records
        );
    }

    Ok(match summary.status {
        SearchStatus::Errored | SearchStatus::Cancelled => {
            eprintln!(
                "rgstream: search {}: {}",
                summary.status,
                summary.error.as_deref().unwrap_or("no details")
            );
            ExitCode::from(2)
        }
        _ if summary.total_matches > 0 => ExitCode::SUCCESS,
        _ => ExitCode::from(1),
    })
}

/// How the config is shown: the same shape as the config file
#[derive(Serialize)]
struct ShownConfig<'a> {
    search: &'a EngineConfig,
}

fn show_config(path_only: bool) -> Result<()> {
    let path = config::config_path()?;
    if path_only {
        println!("{}", path.display());
        return Ok(());
    }

    let config = EngineConfig::load();
    println!("# {}", path.display());
    let shown = toml::to_string_pretty(&ShownConfig { search: &config })
        .context("Failed to serialize config")?;
    print!("{}", shown);
    Ok(())
}
