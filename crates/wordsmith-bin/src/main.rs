//! Wordsmith entrypoint: inspect and batch-edit documents from the shell.
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use core_actions::{Command, Editor};
use core_blocks::{decompose, parse};
use core_cite::CitationStyle;
use core_config::{Config, load_from};
use core_document::{Document, Range};
use core_services::{CitationRecord, InMemoryBibliography, InMemoryCredits, ScriptedGenerator};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Once;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;

const LOG_FILE: &str = "wordsmith.log";

/// Offline editor: no generation backend and no word credits.
type CliEditor = Editor<ScriptedGenerator, InMemoryCredits, InMemoryBibliography>;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "wordsmith", version, about = "Wordsmith document engine")]
struct Args {
    /// Configuration file path (overrides discovery of `wordsmith.toml`).
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Print the top-level blocks of a document.
    Blocks { file: PathBuf },
    /// Print the plain text of a document.
    Text { file: PathBuf },
    /// Print the document delta as JSON.
    Delta { file: PathBuf },
    /// Rewrite every citation for a citation style.
    Reformat {
        file: PathBuf,
        /// `numeric` or `author-date`.
        #[arg(long)]
        style: String,
        /// TOML file holding the citation records for the document.
        #[arg(long)]
        bibliography: PathBuf,
        /// Write here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Run editor commands (`h1`, `bold`, `link <url>`, ...) over a selection.
    Exec {
        file: PathBuf,
        /// `index` for a caret or `index:length` for a range.
        #[arg(long, default_value = "0")]
        select: String,
        #[arg(long = "command", short = 'c', required = true)]
        commands: Vec<String>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

/// On-disk bibliography: the records `list_by_document` would return.
#[derive(Debug, Deserialize, Default)]
struct BibliographyFile {
    document_id: Option<String>,
    #[serde(default)]
    citations: Vec<CitationRecord>,
}

fn configure_logging() -> Option<WorkerGuard> {
    let log_dir = Path::new(".");
    let log_path = log_dir.join(LOG_FILE);
    if log_path.exists() {
        let _ = fs::remove_file(&log_path);
    }
    let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
    let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(nb_writer)
        .try_init()
        .ok()
        // Already installed elsewhere: drop the guard so the writer shuts down.
        .map(|_| guard)
}

fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            tracing::error!(target: "runtime.panic", ?info, "panic");
            default_panic(info);
        }));
    });
}

/// Markup when the file starts with a tag, plain text otherwise.
fn load_document(path: &Path) -> Result<Document> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let doc = if content.trim_start().starts_with('<') {
        parse(&content).with_context(|| format!("parsing {}", path.display()))?
    } else {
        Document::from_text(&content)
    };
    debug!(target: "io", file = %path.display(), size_bytes = content.len(), len = doc.len(), "file_read_ok");
    Ok(doc)
}

fn document_id_for(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document")
        .to_string()
}

/// Records in the file are scoped to `document_id` unless they say otherwise.
fn load_bibliography(path: &Path, fallback_id: &str) -> Result<(String, Vec<CitationRecord>)> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let file: BibliographyFile =
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
    let document_id = file.document_id.unwrap_or_else(|| fallback_id.to_string());
    let records = file
        .citations
        .into_iter()
        .map(|mut r| {
            if r.entry.document_id.is_empty() {
                r.entry.document_id = document_id.clone();
            }
            r
        })
        .collect();
    Ok((document_id, records))
}

fn parse_selection(raw: &str) -> Result<Range> {
    let (index, length) = match raw.split_once(':') {
        Some((i, l)) => (i.trim(), l.trim()),
        None => (raw.trim(), "0"),
    };
    let (Ok(index), Ok(length)) = (index.parse::<usize>(), length.parse::<usize>()) else {
        bail!("invalid selection `{raw}`: expected `index` or `index:length`");
    };
    Ok(Range::new(index, length))
}

fn render_blocks(doc: &Document) -> String {
    let mut out = String::new();
    for (i, block) in decompose(doc).iter().enumerate() {
        out.push_str(&format!(
            "{i}\t{}\t{}\t{}..{}\t{:?}\n",
            block.kind,
            block.id.as_deref().unwrap_or("-"),
            block.range.index,
            block.range.end(),
            block.text()
        ));
    }
    out
}

fn editor(config: &Config, doc: Document, document_id: String, store: InMemoryBibliography) -> CliEditor {
    Editor::new(
        doc,
        document_id,
        &config.file,
        ScriptedGenerator::new(),
        InMemoryCredits::new(0),
        store,
    )
}

/// Returns the rewritten markup and how many citations changed.
async fn run_reformat(
    config: &Config,
    file: &Path,
    style: &str,
    bibliography: &Path,
) -> Result<(String, usize)> {
    let style: CitationStyle = style.parse()?;
    let doc = load_document(file)?;
    let (document_id, records) = load_bibliography(bibliography, &document_id_for(file))?;
    let mut ed = editor(config, doc, document_id, InMemoryBibliography::with_records(records));
    let known = ed.hydrate().await?;
    let rewritten = ed.change_citation_style(style)?;
    info!(target: "runtime", style = style.as_str(), known, rewritten, "reformat_complete");
    Ok((ed.serialize(), rewritten))
}

async fn run_exec(config: &Config, file: &Path, select: &str, commands: &[String]) -> Result<String> {
    let commands = commands
        .iter()
        .map(|c| c.parse::<Command>())
        .collect::<Result<Vec<_>, _>>()?;
    let doc = load_document(file)?;
    let mut ed = editor(config, doc, document_id_for(file), InMemoryBibliography::new());
    ed.set_selection(Some(parse_selection(select)?))?;
    for command in commands {
        ed.execute(command)?;
    }
    ed.drain_events().await;
    Ok(ed.serialize())
}

fn write_output(out: Option<&Path>, content: &str) -> Result<()> {
    match out {
        Some(path) => {
            fs::write(path, content).with_context(|| format!("writing {}", path.display()))
        }
        None => {
            print!("{content}");
            Ok(())
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let _log_guard = configure_logging();
    install_panic_hook();
    let args = Args::parse();
    let config = load_from(args.config.clone())?;
    info!(target: "runtime", config = ?config.path, "startup");

    match args.command {
        Cmd::Blocks { file } => write_output(None, &render_blocks(&load_document(&file)?)),
        Cmd::Text { file } => write_output(None, &load_document(&file)?.text()),
        Cmd::Delta { file } => {
            let doc = load_document(&file)?;
            let json = serde_json::to_string_pretty(doc.contents())?;
            write_output(None, &format!("{json}\n"))
        }
        Cmd::Reformat {
            file,
            style,
            bibliography,
            out,
        } => {
            let (markup, rewritten) = run_reformat(&config, &file, &style, &bibliography).await?;
            eprintln!("{rewritten} citation(s) rewritten");
            write_output(out.as_deref(), &markup)
        }
        Cmd::Exec {
            file,
            select,
            commands,
            out,
        } => {
            let markup = run_exec(&config, &file, &select, &commands).await?;
            write_output(out.as_deref(), &markup)
        }
    }
}
