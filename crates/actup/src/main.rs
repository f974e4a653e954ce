use actup_lib::commands;
use actup_lib::commands::app::AppError;
use actup_lib::config::{Config, ConfigError, DEFAULT_FOLDER, RunOptions, SETTINGS_FILE_NAME, Settings};
use actup_lib::domain::AccountKind;
use clap::Parser;
use log::LevelFilter;
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the actup CLI binary
#[derive(Debug, Error)]
enum ActupError {
    /// Settings could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Command orchestration failed.
    #[error(transparent)]
    App(#[from] AppError),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Parser)]
#[command(name = "actup")]
#[command(about = "Bump GitHub Actions versions across all repositories of an organization", long_about = None)]
#[command(version)]
struct Cli {
    /// Reuse the repositories already in the folder instead of cloning
    #[arg(short = 'c', long)]
    skip_clone: bool,

    /// Do not push or touch pull requests, only log what would happen
    #[arg(short, long)]
    dry_run: bool,

    /// Repositories to leave alone (comma separated)
    #[arg(short, long, value_delimiter = ',')]
    exclude: Vec<String>,

    /// Scratch folder where repositories are cloned
    #[arg(short, long, default_value = DEFAULT_FOLDER)]
    folder: PathBuf,

    /// Skip forked repositories
    #[arg(short = 'k', long)]
    no_forks: bool,

    /// Skip repositories larger than this many kilobytes
    #[arg(short, long, value_name = "KB")]
    max_size_kb: Option<u64>,

    /// One pull request per action (not supported)
    #[arg(short, long)]
    split_prs: bool,

    /// Only process repositories these teams can push to (comma separated)
    #[arg(short, long, value_delimiter = ',')]
    teams: Vec<String>,

    /// The owner is a user account, not an organization
    #[arg(short, long)]
    user: bool,

    /// Push branches and create or update pull requests
    #[arg(short = 'y', long)]
    approve: bool,

    /// Number of concurrent clones
    #[arg(short, long, value_name = "N")]
    parallelism: Option<usize>,

    /// Settings file; when given it must exist
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn run_options(&self) -> RunOptions {
        RunOptions {
            skip_clone: self.skip_clone,
            dry_run: self.dry_run,
            exclude: self.exclude.clone(),
            folder: self.folder.clone(),
            skip_forks: self.no_forks,
            max_size_kb: self.max_size_kb,
            split_prs: self.split_prs,
            teams: self.teams.clone(),
            account_kind: if self.user {
                AccountKind::User
            } else {
                AccountKind::Organization
            },
            approve: self.approve,
            parallelism: self.parallelism,
        }
    }
}

fn main() -> Result<(), ActupError> {
    let cli = Cli::parse();

    init_logging(&cli);

    let work_dir = std::env::current_dir()?;
    let settings = match &cli.config {
        Some(path) => Settings::load(path, true)?,
        None => Settings::load(&work_dir.join(SETTINGS_FILE_NAME), false)?,
    };

    let config = Config {
        settings,
        options: cli.run_options(),
        work_dir,
    };

    let today = time::OffsetDateTime::now_utc().date();
    commands::app::run(&config, today)?;
    Ok(())
}

/// Initialize logging based on the verbosity level specified in the CLI
fn init_logging(cli: &Cli) {
    let mut builder = env_logger::builder();
    builder
        .filter_level(if cli.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .format(|buf, record| {
            let level = record.level();
            let style = &buf.default_level_style(level);
            writeln!(buf, "[{style}{level}{style:#}] {}", record.args())
        });

    if !cli.verbose {
        builder.format_timestamp(None);
    }

    builder.init();
}
