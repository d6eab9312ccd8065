use std::process::ExitCode;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use xnat_migration_report::app::App;
use xnat_migration_report::config::{
    DEFAULT_ARCHIVE_DIR, DEFAULT_DEST_PROFILE, DEFAULT_SIZE_WORKERS, DEFAULT_SOURCE_PROFILE,
    DEFAULT_WORKERS, ExistenceScope, HttpSettings, ProfileLoader, RunSettings, SizeMode,
};
use xnat_migration_report::domain::SizeKeys;
use xnat_migration_report::error::MigrationError;
use xnat_migration_report::output::{JsonOutput, LogProgress};
use xnat_migration_report::report::{CsvReportWriter, ReportWriter};
use xnat_migration_report::xnat::HttpConnector;

#[derive(Parser)]
#[command(name = "xnat-migration-report")]
#[command(about = "Report which XNAT sessions were migrated to the destination instance and archived")]
#[command(version, author)]
struct Cli {
    /// pyxnat-style JSON profile for the source instance (default ~/xnat.cfg)
    #[arg(long)]
    source_config: Option<String>,

    /// pyxnat-style JSON profile for the destination instance (default ~/xnat2.cfg)
    #[arg(long)]
    dest_config: Option<String>,

    #[arg(long, default_value = DEFAULT_ARCHIVE_DIR)]
    archive_dir: Utf8PathBuf,

    #[arg(long, default_value = "migration_report.csv")]
    output: Utf8PathBuf,

    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Also sum individual file sizes for every session (slow)
    #[arg(long)]
    estimate_sizes: bool,

    #[arg(long, default_value_t = DEFAULT_SIZE_WORKERS)]
    size_workers: usize,

    /// Fetch file attributes one at a time when estimating sizes
    #[arg(long)]
    sequential_sizes: bool,

    /// Attribute names checked for a file size, in order (repeatable)
    #[arg(long = "size-key")]
    size_keys: Vec<String>,

    /// Look for the session only inside the same project on the destination
    #[arg(long)]
    scoped_existence: bool,

    /// Check that archives found on disk are readable gzip files
    #[arg(long)]
    verify_archives: bool,

    /// Regex applied to subject labels before dispatch
    #[arg(long)]
    subject_filter: Option<String>,

    #[arg(long)]
    limit: Option<usize>,

    /// Print every row as JSON instead of only the summary
    #[arg(long)]
    json: bool,

    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,

    #[arg(long, default_value_t = 0)]
    max_retries: usize,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<MigrationError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &MigrationError) -> u8 {
    match error {
        MigrationError::MissingConfig(_)
        | MigrationError::ConfigRead(_)
        | MigrationError::ConfigParse(_)
        | MigrationError::InvalidFilter(_) => 2,
        MigrationError::XnatHttp(_)
        | MigrationError::XnatStatus { .. }
        | MigrationError::MalformedResponse { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let source_profile =
        ProfileLoader::resolve(cli.source_config.as_deref(), DEFAULT_SOURCE_PROFILE)?;
    let dest_profile = ProfileLoader::resolve(cli.dest_config.as_deref(), DEFAULT_DEST_PROFILE)?;
    let http = HttpSettings {
        timeout: Duration::from_secs(cli.timeout_secs),
        max_retries: cli.max_retries,
    };

    let size_mode = cli.estimate_sizes.then(|| {
        if cli.sequential_sizes {
            SizeMode::Sequential
        } else {
            SizeMode::Concurrent {
                workers: cli.size_workers,
            }
        }
    });
    let settings = RunSettings {
        workers: cli.workers,
        archive_dir: cli.archive_dir,
        size_mode,
        size_keys: SizeKeys::new(cli.size_keys),
        existence_scope: if cli.scoped_existence {
            ExistenceScope::Project
        } else {
            ExistenceScope::Global
        },
        verify_archives: cli.verify_archives,
        subject_filter: cli.subject_filter,
        limit: cli.limit,
    };

    let app = App::new(
        HttpConnector::new(source_profile, http.clone()),
        HttpConnector::new(dest_profile, http),
        settings,
    );
    let result = app.run(&LogProgress)?;

    CsvReportWriter::new(&cli.output).write(&result.rows)?;
    tracing::info!(path = %cli.output, rows = result.rows.len(), "report written");

    if cli.json {
        JsonOutput::print_result(&result).into_diagnostic()?;
    } else {
        JsonOutput::print_summary(&result.summary).into_diagnostic()?;
    }
    Ok(())
}
