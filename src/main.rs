use clap::{Parser, Subcommand};
use mediasort::config::{self, Config, ImportMode};
use mediasort::extract::{ExifTool, TagExtractor};
use mediasort::geo::{Geocoder, NominatimGeocoder};
use mediasort::organize::{CleanOptions, MetadataEdit, OrganizeError, OrganizeEvent, Organizer};
use mediasort::output;
use mediasort::summary::RunSummary;
use mediasort::types::CancelToken;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

/// Config overrides for this run only.
#[derive(clap::Args, Clone, Default)]
struct OverrideArgs {
    /// Directory template, e.g. "<%Y>/<%m-%b>-<city>"
    #[arg(long, global = true)]
    dirs_path: Option<String>,

    /// Filename template, e.g. "<%Y%m%d-%H%M%S>-<basename>"
    #[arg(long, global = true)]
    name: Option<String>,

    /// Skip paths matching this glob (repeatable)
    #[arg(long, global = true)]
    exclude: Vec<String>,

    /// Never read tags matching this regex (repeatable)
    #[arg(long, global = true)]
    ignore_tags: Vec<String>,

    /// Use the last source folder as album when no album tag is set
    #[arg(long, global = true)]
    album_from_folder: bool,

    /// Fall back to file creation/modification dates
    #[arg(long, global = true)]
    use_file_dates: bool,

    /// Disable reverse geocoding
    #[arg(long, global = true)]
    no_geolocation: bool,

    /// Maximum parallel workers
    #[arg(long, global = true)]
    max_processes: Option<usize>,
}

impl OverrideArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(dirs) = &self.dirs_path {
            config.path.dirs_path = dirs.clone();
        }
        if let Some(name) = &self.name {
            config.path.name = name.clone();
        }
        config.filters.exclude.extend(self.exclude.iter().cloned());
        config.metadata.ignore_tags.extend(self.ignore_tags.iter().cloned());
        config.metadata.album_from_folder |= self.album_from_folder;
        config.metadata.use_file_dates |= self.use_file_dates;
        if self.no_geolocation {
            config.geolocation.enabled = false;
        }
        if let Some(n) = self.max_processes {
            config.processing.max_processes = Some(n);
        }
    }
}

#[derive(Parser)]
#[command(name = "mediasort")]
#[command(about = "Organize photos and videos by their own metadata")]
#[command(long_about = "\
Organize photos and videos by their own metadata

Files are placed under the collection root following two path templates,
rendered from tags read with exiftool:

  [path]
  dirs_path = \"<%Y>/<%m-%b>-<city>\"
  name      = \"<%Y%m%d-%H%M%S>-<basename>\"

  IMG_3900.JPG  →  2015/06-Jun-California/20150629-163414-IMG_3900.JPG

Every placed file is recorded in <root>/.mediasort/ with its checksum and
the metadata its path came from. Re-running sort on an organized
collection moves nothing; check verifies every file against its checksum.

Run 'mediasort gen-config' to print a documented config.toml.")]
#[command(version)]
struct Cli {
    /// Collection root
    #[arg(long, default_value = ".", global = true)]
    root: PathBuf,

    /// Report what would happen without changing anything
    #[arg(long, global = true)]
    dry_run: bool,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// exiftool executable
    #[arg(long, default_value = "exiftool", global = true)]
    exiftool: PathBuf,

    #[command(flatten)]
    overrides: OverrideArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bring files from outside into the collection
    Import {
        /// Files or directories to import
        #[arg(required = true)]
        sources: Vec<PathBuf>,
        /// Copy instead of move
        #[arg(long)]
        copy: bool,
    },
    /// Re-place files already inside the collection
    Sort {
        /// Limit to these paths (default: whole collection)
        paths: Vec<PathBuf>,
    },
    /// Move near-duplicate images to the duplicates directory
    Compare {
        /// Limit to these paths (default: whole collection)
        paths: Vec<PathBuf>,
        /// Maximum differing hash bits (0-64)
        #[arg(long)]
        similarity: Option<u32>,
    },
    /// Undo the last compare
    RevertCompare,
    /// Verify every tracked file against its checksum
    Check,
    /// Track an existing collection where it lies
    Init,
    /// Change the recorded metadata of one file and re-place it
    Edit {
        path: PathBuf,
        /// field=value, empty value clears (repeatable)
        #[arg(long = "set", required = true)]
        edits: Vec<MetadataEdit>,
    },
    /// Stop tracking files
    Remove {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Also delete the files
        #[arg(long)]
        delete: bool,
    },
    /// Bring the records in line with files moved, added or deleted by hand
    Update {
        /// Re-read changed files instead of reporting them
        #[arg(long)]
        checksum: bool,
    },
    /// Delete excluded files and empty directories
    Clean {
        /// Limit to these paths (default: whole collection)
        paths: Vec<PathBuf>,
        /// Only delete files matching the exclude globs
        #[arg(long)]
        excluded: bool,
        /// Only delete empty directories
        #[arg(long)]
        empty_dirs: bool,
    },
    /// Copy the checked collection into an empty directory
    Clone {
        dest: PathBuf,
    },
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn run(cli: Cli) -> Result<ExitCode, OrganizeError> {
    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(ExitCode::SUCCESS);
    }

    let root = collection_root(&cli.root)?;
    let mut config = config::load_config(&root)?;
    cli.overrides.apply(&mut config);
    if let Command::Compare {
        similarity: Some(threshold),
        ..
    } = &cli.command
    {
        config.similarity.threshold = *threshold;
    }
    let import_mode = config.import.mode;

    let geocoder: Option<Arc<dyn Geocoder>> = if config.geolocation.enabled {
        match NominatimGeocoder::new(&config.geolocation) {
            Ok(g) => Some(Arc::new(g)),
            Err(e) => {
                log::warn!("geolocation disabled: {e}");
                None
            }
        }
    } else {
        None
    };
    let extractor: Arc<dyn TagExtractor> = Arc::new(ExifTool::new(&cli.exiftool));

    let (tx, rx) = mpsc::channel::<OrganizeEvent>();
    let printer_root = root.clone();
    let printer = thread::spawn(move || {
        for event in rx {
            for line in output::format_event(&event, Some(printer_root.as_path())) {
                println!("{}", line);
            }
        }
    });

    let organizer = Organizer::new(&root, config, extractor, geocoder)?
        .dry_run(cli.dry_run)
        .with_events(tx)
        .with_cancel(interrupt_token());

    let result = match cli.command {
        Command::Import { sources, copy } => {
            let mode = if copy { ImportMode::Copy } else { import_mode };
            organizer.import(&sources, mode).map(Outcome::Run)
        }
        Command::Sort { paths } => organizer.sort(&paths).map(Outcome::Run),
        Command::Compare { paths, .. } => organizer.compare(&paths).map(Outcome::Run),
        Command::RevertCompare => organizer.revert_compare().map(Outcome::Run),
        Command::Init => organizer.init().map(Outcome::Run),
        Command::Edit { path, edits } => organizer.edit(&path, &edits).map(Outcome::Run),
        Command::Remove { paths, delete } => organizer.remove(&paths, delete).map(Outcome::Run),
        Command::Check => organizer.check().map(Outcome::Check),
        Command::Update { checksum } => organizer.update(checksum).map(Outcome::Run),
        Command::Clean {
            paths,
            excluded,
            empty_dirs,
        } => {
            // Neither flag means both.
            let both = !excluded && !empty_dirs;
            let options = CleanOptions {
                excluded: excluded || both,
                empty_dirs: empty_dirs || both,
            };
            organizer.clean(&paths, options).map(Outcome::Run)
        }
        Command::Clone { dest } => organizer.clone_to(&dest).map(Outcome::Run),
        // Printed before the collection was opened.
        Command::GenConfig => Ok(Outcome::Run(RunSummary::default())),
    };

    // Closes the channel so the printer drains and exits.
    drop(organizer);
    if printer.join().is_err() {
        log::warn!("output thread panicked");
    }

    match result? {
        Outcome::Run(summary) => {
            output::print_run_summary(&summary, cli.dry_run);
            Ok(exit_code(&summary))
        }
        Outcome::Check(report) => {
            output::print_check_report(&report);
            Ok(if report.is_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

enum Outcome {
    Run(RunSummary),
    Check(mediasort::store::CheckReport),
}

/// Token cancelled by Ctrl-C or SIGTERM. Files in progress finish and the
/// store is saved before the run returns.
fn interrupt_token() -> CancelToken {
    let token = CancelToken::new();
    let handler_token = token.clone();
    let installed = ctrlc::set_handler(move || {
        eprintln!("interrupted, finishing files in progress");
        handler_token.cancel();
    });
    if let Err(e) = installed {
        log::warn!("could not install the interrupt handler: {e}");
    }
    token
}

fn exit_code(summary: &RunSummary) -> ExitCode {
    if summary.cancelled {
        // 128 + SIGINT
        ExitCode::from(130)
    } else if summary.is_fatal() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Absolute collection root; created when missing so `import` can start an
/// empty collection.
fn collection_root(root: &Path) -> Result<PathBuf, OrganizeError> {
    std::fs::create_dir_all(root)?;
    Ok(root.canonicalize()?)
}
