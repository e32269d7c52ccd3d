use std::{
    collections::{BTreeSet, HashSet},
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use taskpaper::TaskPaperDocument;
use taskpaper::core::{ItemId, ItemType, Settings, Tag};
use taskpaper::projectors::{filter_projector, filter_projector::ItemFilter, tag_projector};
use taskpaper::storage::{self, DocumentStore, FsDocumentStore};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "taskpaper",
    about = "Read and edit TaskPaper outlines from the command line",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    /// JSON settings file (inbox name, done tag, date format).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Parse TaskPaper files and print their items.
    Parse(ParseArgs),

    /// Rewrite files in canonical form.
    Format(FormatArgs),

    /// Count projects, tasks and notes.
    Stats(InputsArgs),

    /// List every tag with its usage count.
    Tags(InputsArgs),

    /// Print items matching a tag and/or a search string.
    Filter(FilterArgs),

    /// Quick-add an item to the inbox project.
    Add(AddArgs),

    /// Toggle completion of an item.
    Done(DoneArgs),

    /// Move, indent or outdent an item together with its children.
    Move(MoveArgs),
}

#[derive(Debug, Args)]
struct ParseArgs {
    /// TaskPaper files or directories containing them.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Emit JSON instead of a listing.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct FormatArgs {
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Overwrite the file instead of printing to stdout.
    #[arg(long)]
    in_place: bool,
}

#[derive(Debug, Args)]
struct InputsArgs {
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

#[derive(Debug, Args)]
struct FilterArgs {
    file: PathBuf,
    /// Tag name, with or without the leading `@`.
    #[arg(long)]
    tag: Option<String>,
    /// Keep items that do not carry the tag.
    #[arg(long = "not", requires = "tag")]
    negated: bool,
    /// Case-insensitive text to look for.
    #[arg(long)]
    search: Option<String>,
}

#[derive(Debug, Args)]
struct AddArgs {
    file: PathBuf,
    text: String,
    #[arg(long, value_enum, default_value_t = KindArg::Task)]
    kind: KindArg,
}

#[derive(Debug, Args)]
struct DoneArgs {
    file: PathBuf,
    /// 1-based item number, as shown by `parse`.
    item: usize,
}

#[derive(Debug, Args)]
struct MoveArgs {
    file: PathBuf,
    /// 1-based item number, as shown by `parse`.
    item: usize,
    #[arg(value_enum)]
    direction: Direction,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum KindArg {
    Task,
    Project,
    Note,
}

impl From<KindArg> for ItemType {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Task => ItemType::Task,
            KindArg::Project => ItemType::Project,
            KindArg::Note => ItemType::Note,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Direction {
    Up,
    Down,
    Indent,
    Outdent,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = match &cli.config {
        Some(path) => storage::load_settings(path)?,
        None => Settings::default(),
    };
    let store = FsDocumentStore::new(settings);

    match cli.command {
        Commands::Parse(args) => handle_parse(&store, args),
        Commands::Format(args) => handle_format(&store, args),
        Commands::Stats(args) => handle_stats(&store, args),
        Commands::Tags(args) => handle_tags(&store, args),
        Commands::Filter(args) => handle_filter(&store, args),
        Commands::Add(args) => handle_add(&store, args),
        Commands::Done(args) => handle_done(&store, args),
        Commands::Move(args) => handle_move(&store, args),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn load_all(store: &impl DocumentStore, inputs: &[PathBuf]) -> Result<Vec<(PathBuf, TaskPaperDocument)>> {
    let expanded = expand_inputs(inputs)?;
    if expanded.is_empty() {
        anyhow::bail!("no TaskPaper files found in the provided inputs");
    }
    let mut docs = Vec::new();
    for path in expanded {
        let doc = store.load(&path).with_context(|| format!("parsing {:?}", path))?;
        docs.push((path, doc));
    }
    Ok(docs)
}

fn print_header(docs_len: usize, path: &Path) {
    if docs_len > 1 {
        println!("== {} ==", path.display());
    }
}

fn handle_parse(store: &impl DocumentStore, args: ParseArgs) -> Result<()> {
    let ParseArgs { inputs, json } = args;
    let parsed = load_all(store, &inputs)?;

    if json {
        #[derive(serde::Serialize)]
        struct JsonItem<'a> {
            number: usize,
            id: ItemId,
            kind: ItemType,
            indent: usize,
            line: Option<usize>,
            text: String,
            raw: &'a str,
            tags: Vec<Tag>,
        }

        #[derive(serde::Serialize)]
        struct JsonOutput<'a> {
            path: String,
            name: &'a str,
            items: Vec<JsonItem<'a>>,
        }

        let payload: Vec<JsonOutput<'_>> = parsed
            .iter()
            .map(|(path, doc)| JsonOutput {
                path: path.display().to_string(),
                name: &doc.file_name,
                items: doc
                    .items()
                    .iter()
                    .enumerate()
                    .map(|(idx, item)| JsonItem {
                        number: idx + 1,
                        id: item.id,
                        kind: item.kind,
                        indent: item.indent_level,
                        line: item.line_number,
                        text: item.display_text(),
                        raw: item.raw_text(),
                        tags: item.tags().into_owned(),
                    })
                    .collect(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        for (idx, (path, doc)) in parsed.iter().enumerate() {
            print_header(parsed.len(), path);
            for (number, item) in doc.items().iter().enumerate() {
                println!(
                    "{:>4} {:<7} {}{}",
                    number + 1,
                    item.kind,
                    "  ".repeat(item.indent_level),
                    item.raw_text()
                );
            }
            if parsed.len() > 1 && idx + 1 < parsed.len() {
                println!();
            }
        }
    }
    Ok(())
}

fn handle_format(store: &impl DocumentStore, args: FormatArgs) -> Result<()> {
    let FormatArgs { inputs, in_place } = args;
    let parsed = load_all(store, &inputs)?;
    let count = parsed.len();

    for (idx, (path, doc)) in parsed.into_iter().enumerate() {
        if in_place {
            store.save(&path, &doc)?;
            tracing::info!(?path, "formatted in place");
            continue;
        }
        if idx > 0 {
            println!();
        }
        print_header(count, &path);
        let formatted = doc.content();
        if !formatted.is_empty() {
            println!("{formatted}");
        }
    }
    Ok(())
}

fn handle_stats(store: &impl DocumentStore, args: InputsArgs) -> Result<()> {
    let parsed = load_all(store, &args.inputs)?;
    for (path, doc) in &parsed {
        let stats = doc.stats();
        println!(
            "{}: {} projects, {} tasks ({} done, {} pending), {} notes",
            path.display(),
            stats.projects,
            stats.tasks,
            stats.completed_tasks,
            stats.pending_tasks(),
            stats.notes
        );
    }
    Ok(())
}

fn handle_tags(store: &impl DocumentStore, args: InputsArgs) -> Result<()> {
    let parsed = load_all(store, &args.inputs)?;
    let mut totals = indexmap::IndexMap::<String, usize>::new();
    for (_, doc) in &parsed {
        for (tag, count) in tag_projector::tag_counts(doc) {
            *totals.entry(tag).or_insert(0) += count;
        }
    }
    if totals.is_empty() {
        eprintln!("No tags found.");
        return Ok(());
    }
    totals.sort_keys();
    for (tag, count) in totals {
        println!("{count:>5} {tag}");
    }
    Ok(())
}

fn handle_filter(store: &impl DocumentStore, args: FilterArgs) -> Result<()> {
    let FilterArgs {
        file,
        tag,
        negated,
        search,
    } = args;
    let doc = store.load(&file)?;
    let filter = ItemFilter {
        tag,
        negated,
        search,
    };
    for id in filter_projector::matching_ids(&doc, &filter) {
        let number = doc.index_of(id).map(|idx| idx + 1).unwrap_or_default();
        if let Some(item) = doc.get(id) {
            println!("{number:>4} {}", item.line());
        }
    }
    Ok(())
}

fn handle_add(store: &impl DocumentStore, args: AddArgs) -> Result<()> {
    let AddArgs { file, text, kind } = args;
    let mut doc = load_or_empty(store, &file)?;
    let Some(id) = doc.quick_add(&text, kind.into()) else {
        anyhow::bail!("refusing to add an empty item");
    };
    store.save(&file, &doc)?;
    if let Some(item) = doc.get(id) {
        println!("Added {}", item.raw_text());
    }
    Ok(())
}

fn handle_done(store: &impl DocumentStore, args: DoneArgs) -> Result<()> {
    let mut doc = store.load(&args.file)?;
    let id = resolve_item(&doc, args.item)?;
    doc.toggle_task_completion(id);
    store.save(&args.file, &doc)?;
    if let Some(item) = doc.get(id) {
        println!("{}", item.line());
    }
    Ok(())
}

fn handle_move(store: &impl DocumentStore, args: MoveArgs) -> Result<()> {
    let mut doc = store.load(&args.file)?;
    let id = resolve_item(&doc, args.item)?;
    let changed = apply_move(&mut doc, id, args.direction);
    if !changed {
        eprintln!("Item {} cannot move {:?}.", args.item, args.direction);
        return Ok(());
    }
    store.save(&args.file, &doc)?;
    if let Some(idx) = doc.index_of(id) {
        println!("Item is now number {}", idx + 1);
    }
    Ok(())
}

/// Returns whether the document changed.
fn apply_move(doc: &mut TaskPaperDocument, id: ItemId, direction: Direction) -> bool {
    match direction {
        Direction::Up => doc.move_up(id),
        Direction::Down => doc.move_down(id),
        Direction::Indent => {
            doc.indent(id);
            true
        }
        Direction::Outdent => {
            let before = doc.get(id).map(|item| item.indent_level);
            doc.outdent(id);
            before != doc.get(id).map(|item| item.indent_level)
        }
    }
}

fn resolve_item(doc: &TaskPaperDocument, number: usize) -> Result<ItemId> {
    if number == 0 {
        anyhow::bail!("item numbers start at 1");
    }
    doc.item_at(number - 1)
        .map(|item| item.id)
        .with_context(|| format!("no item {number}; the document has {} items", doc.len()))
}

fn load_or_empty(store: &impl DocumentStore, path: &Path) -> Result<TaskPaperDocument> {
    if path.exists() {
        return store.load(path);
    }
    tracing::info!(?path, "creating new document");
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Untitled".to_string());
    Ok(TaskPaperDocument::with_settings("", name, store.settings().clone()))
}

fn is_taskpaper_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext == "taskpaper")
        .unwrap_or(false)
}

fn expand_inputs(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut visited = BTreeSet::new();
    for path in paths {
        let canonical =
            fs::canonicalize(path).with_context(|| format!("resolving path {:?}", path))?;
        let meta = fs::metadata(&canonical)
            .with_context(|| format!("reading metadata for {:?}", canonical))?;
        if meta.is_dir() {
            tracing::debug!(dir = ?canonical, "scanning directory");
            let mut found = Vec::new();
            visit_dir(&canonical, &mut found, &mut HashSet::new())?;
            found.sort();
            for file in found {
                if visited.insert(file.clone()) {
                    out.push(file);
                }
            }
        } else if meta.is_file() {
            if !is_taskpaper_file(&canonical) {
                anyhow::bail!("{:?} is not a .taskpaper file", canonical);
            }
            if visited.insert(canonical.clone()) {
                out.push(canonical);
            }
        }
    }
    Ok(out)
}

fn visit_dir(path: &Path, out: &mut Vec<PathBuf>, visited: &mut HashSet<PathBuf>) -> Result<()> {
    let canonical = fs::canonicalize(path)?;
    if !visited.insert(canonical.clone()) {
        return Ok(());
    }

    let metadata = fs::metadata(&canonical)?;
    if metadata.is_dir() {
        for entry in fs::read_dir(&canonical)? {
            let entry = entry?;
            if entry.file_type()?.is_symlink() {
                continue;
            }
            visit_dir(&entry.path(), out, visited)?;
        }
    } else if metadata.is_file() && is_taskpaper_file(&canonical) {
        out.push(canonical);
    }
    Ok(())
}
