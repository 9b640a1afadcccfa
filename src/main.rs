//! folio-store CLI: import, scan and manage a book library.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};

use folio_store::{
    BookUpdate, CoverInput, DeletePolicy, ImportRequest, Library, LibraryConfig, ScanTemplate,
};

#[derive(Parser)]
#[command(name = "folio-store", version, about = "Book library ingestion and storage")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Storage root; overrides the config file.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// More log output (-v info, -vv debug).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct Owner {
    /// Uploader id recorded on rows and history entries.
    #[arg(long)]
    user: String,

    /// Store under private/<owner> instead of public.
    #[arg(long)]
    private: bool,

    /// Owner directory name for private imports.
    #[arg(long)]
    owner: Option<String>,

    #[arg(long)]
    category: Option<String>,

    /// Move sources into the library instead of copying them.
    #[arg(long = "move")]
    move_source: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Import one or more files.
    Import {
        files: Vec<PathBuf>,

        #[command(flatten)]
        owner: Owner,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        author: Option<String>,

        /// Cover image: a local path or an http(s) URL.
        #[arg(long)]
        cover: Option<String>,

        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Number the files 0001_, 0002_, ... in the given order.
        #[arg(long)]
        numbered: bool,
    },

    /// Import every supported file below a directory.
    Scan {
        dir: PathBuf,

        #[command(flatten)]
        owner: Owner,
    },

    /// Show recent import history.
    History {
        #[arg(long)]
        user: Option<String>,

        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Import counts by status, day and format.
    Stats,

    /// Drop history entries older than a Unix millisecond timestamp.
    Purge {
        #[arg(long)]
        before: i64,
    },

    /// Edit a book; title/author/category/visibility changes move its files.
    Update {
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        author: Option<String>,

        #[arg(long)]
        category: Option<String>,

        /// `public` or `private`.
        #[arg(long)]
        visibility: Option<String>,

        #[arg(long)]
        owner: Option<String>,

        #[arg(long)]
        description: Option<String>,
    },

    /// Delete a book with its file and cover.
    Delete {
        id: String,

        /// Also delete the book's other formats instead of promoting one.
        #[arg(long)]
        cascade: bool,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    let config = ConfigBuilder::new().set_target_level(LevelFilter::Off).build();
    if let Err(err) = TermLogger::init(level, config, TerminalMode::Stderr, ColorChoice::Auto) {
        eprintln!("[warn] logger init failed: {err}");
    }
}

fn load_config(cli: &Cli) -> folio_store::Result<LibraryConfig> {
    let mut config = match &cli.config {
        Some(path) => LibraryConfig::load(path)?,
        None => match &cli.root {
            Some(root) => LibraryConfig::with_storage_root(root),
            None => LibraryConfig::default(),
        },
    };
    if let (Some(_), Some(root)) = (&cli.config, &cli.root) {
        config.storage_root = root.clone();
    }
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn template(owner: &Owner) -> ScanTemplate {
    ScanTemplate {
        user_id: owner.user.clone(),
        owner_name: owner.owner.clone(),
        is_public: !owner.private,
        category: owner.category.clone(),
        delete_source: owner.move_source,
    }
}

fn cover_input(raw: &str) -> CoverInput {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        CoverInput::Url(raw.to_string())
    } else {
        CoverInput::File(PathBuf::from(raw))
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let library = Library::open(load_config(&cli)?)?;

    match cli.command {
        Commands::Import {
            files,
            owner,
            title,
            author,
            cover,
            tags,
            numbered,
        } => {
            let defaults = template(&owner);
            let requests: Vec<ImportRequest> = files
                .iter()
                .enumerate()
                .map(|(index, file)| {
                    let mut request = defaults.request_for(file);
                    request.title = title.clone();
                    request.author = author.clone();
                    request.tags = tags.clone();
                    request.cover = cover.as_deref().map(cover_input);
                    if numbered {
                        request.sequence = Some(index as u32 + 1);
                    }
                    request
                })
                .collect();
            if let [single] = requests.as_slice() {
                print_json(&library.import_file(single))?;
            } else {
                print_json(&library.import_batch(&requests))?;
            }
        }
        Commands::Scan { dir, owner } => {
            let manifest = library.scan_directory(&dir, &template(&owner))?;
            print_json(&manifest)?;
        }
        Commands::History { user, limit } => {
            print_json(&library.history(user.as_deref(), limit)?)?;
        }
        Commands::Stats => print_json(&library.history_stats()?)?,
        Commands::Purge { before } => {
            let removed = library.purge_history(before)?;
            print_json(&serde_json::json!({ "removed": removed }))?;
        }
        Commands::Update {
            id,
            title,
            author,
            category,
            visibility,
            owner,
            description,
        } => {
            let is_public = match visibility.as_deref() {
                None => None,
                Some("public") => Some(true),
                Some("private") => Some(false),
                Some(other) => return Err(format!("unknown visibility: {other}").into()),
            };
            let update = BookUpdate {
                title,
                author,
                category,
                is_public,
                owner_name: owner,
                description,
                ..BookUpdate::default()
            };
            print_json(&library.update_book(&id, &update)?)?;
        }
        Commands::Delete { id, cascade } => {
            let policy = if cascade {
                DeletePolicy::Cascade
            } else {
                DeletePolicy::Promote
            };
            print_json(&library.delete_book(&id, policy)?)?;
        }
    }
    Ok(())
}
