use cardlift::batch::{convert_all, BatchItem, DirectorySink};
use cardlift::chunk;
use cardlift::convert::{ConvertOptions, Converter};
use cardlift::locate::Strategy;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cardlift", version, about = "Extract and re-embed PNG character cards")]
struct Cli {
    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert images into normalized .tavern.png / .tavern.json pairs
    Convert {
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
        #[arg(short, long, default_value = "converted")]
        output: PathBuf,
        /// JSON options file (keyword, samplers, tool name/version)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// tEXt keyword to read and write
        #[arg(short, long)]
        keyword: Option<String>,
        /// Consult a BackyardAI database before the image (default location if no path)
        #[cfg(feature = "backyard-db")]
        #[arg(long, num_args = 0..=1)]
        database: Option<Option<PathBuf>>,
    },
    /// Export every character from a BackyardAI database
    #[cfg(feature = "backyard-db")]
    Database {
        path: Option<PathBuf>,
        #[arg(short, long, default_value = "converted")]
        output: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the normalized card JSON for one image
    Extract {
        input: PathBuf,
        #[arg(short, long)]
        keyword: Option<String>,
    },
    /// List chunks and try every extraction strategy on one image
    Inspect {
        input: PathBuf,
        #[arg(short, long)]
        keyword: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(cli.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// `Ok(false)` when the command ran but some item failed.
fn run(command: Commands) -> Result<bool, Box<dyn std::error::Error>> {
    match command {

        // ── Convert ──────────────────────────────────────────────────────────
        Commands::Convert {
            inputs,
            output,
            config,
            keyword,
            #[cfg(feature = "backyard-db")]
            database,
        } => {
            let options = load_options(config, keyword)?;
            let with_display = options.display_name_in_filename;
            let converter = Converter::new(options);
            #[cfg(feature = "backyard-db")]
            let converter = match database {
                Some(path) => converter.with_source(std::sync::Arc::new(open_database(path)?)),
                None => converter,
            };

            let items: Vec<BatchItem> = inputs.into_iter().map(BatchItem::Image).collect();
            let sink = DirectorySink::new(&output, with_display)?;
            let report = convert_all(&items, &converter, &sink);

            println!("── Conversion ───────────────────────────────────────────");
            println!("{}", report.summary());
            println!("  Output  {}", sink.dir().display());
            Ok(report.all_succeeded())
        }

        // ── Database ─────────────────────────────────────────────────────────
        #[cfg(feature = "backyard-db")]
        Commands::Database { path, output, config } => {
            let db = open_database(path)?;
            let options = load_options(config, None)?;
            let sink = DirectorySink::new(&output, options.display_name_in_filename)?;
            let items: Vec<BatchItem> = db.characters()?.into_iter().map(BatchItem::Record).collect();
            tracing::info!(count = items.len(), db = %db.path().display(), "characters found");

            let report = convert_all(&items, &Converter::new(options), &sink);
            println!("{}", report.summary());
            Ok(report.all_succeeded())
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { input, keyword } => {
            let converter = Converter::new(load_options(None, keyword)?);
            let image = std::fs::read(&input)?;
            let filename = input.file_name().and_then(|n| n.to_str());
            let (record, origin) = converter.extract(&image, filename)?;
            tracing::info!(%origin, "extracted");
            println!("{}", cardlift::writer::to_json_text(&record)?);
            Ok(true)
        }

        // ── Inspect ──────────────────────────────────────────────────────────
        Commands::Inspect { input, keyword } => {
            let options = load_options(None, keyword)?;
            let locator = cardlift::MetadataLocator::new(options.keyword);
            let bytes = std::fs::read(&input)?;

            println!("── {} ({} bytes) ──", input.display(), bytes.len());
            match chunk::parse_detailed(&bytes) {
                Ok(parsed) => {
                    println!("{:<6} {:>10} {:>10}  {}", "Type", "Length", "CRC", "Status");
                    for c in &parsed.chunks {
                        let status = if c.crc_matches() {
                            "ok".to_owned()
                        } else {
                            format!("mismatch (computed {})", hex::encode(c.computed_crc().to_be_bytes()))
                        };
                        println!("{:<6} {:>10} {:>10}  {}",
                            c.chunk_type.to_string(), c.payload.len(),
                            hex::encode(c.crc.to_be_bytes()), status);
                    }
                    if !parsed.terminated {
                        println!("  (no IEND)");
                    }
                    if let Some(err) = parsed.trailing {
                        println!("  trailing: {err}");
                    }
                }
                Err(e) => println!("  {e}"),
            }

            println!("Strategies:");
            let mut found = false;
            for strategy in Strategy::ALL {
                match locator.try_strategy(strategy, &bytes) {
                    Ok(object) => {
                        let name = object.get("name").and_then(|v| v.as_str()).unwrap_or("-");
                        println!("  {:<20} ok ({} keys, name {name})", strategy.name(), object.len());
                        found = true;
                    }
                    Err(e) => println!("  {:<20} {e}", strategy.name()),
                }
            }
            Ok(found)
        }
    }
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn load_options(
    config: Option<PathBuf>,
    keyword: Option<String>,
) -> Result<ConvertOptions, Box<dyn std::error::Error>> {
    let mut options = match config {
        Some(path) => ConvertOptions::from_json_file(path)?,
        None => ConvertOptions::default(),
    };
    if let Some(keyword) = keyword {
        options.keyword = keyword;
    }
    Ok(options)
}

#[cfg(feature = "backyard-db")]
fn open_database(
    path: Option<PathBuf>,
) -> Result<cardlift::source::sqlite::BackyardDb, Box<dyn std::error::Error>> {
    use cardlift::source::sqlite::BackyardDb;
    let path = path
        .or_else(BackyardDb::default_path)
        .ok_or("no database path given and no default location")?;
    Ok(BackyardDb::open(path)?)
}
