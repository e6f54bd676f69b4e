//! SpatialData: co-registered multi-modal spatial datasets.
//!
//! A [`SpatialData`] container holds images, label rasters, points, shapes
//! and tables that share coordinate systems. Each spatial element carries
//! named transformations from its native frame into other systems; the
//! alignment engine composes them to place any element in any reachable
//! system, and the store layer persists containers to a versioned
//! hierarchical layout with lazily loaded payloads.
//!
//! # Modules
//!
//! - [`transform`]: coordinate systems and the transformation algebra
//! - [`array`]: n-dimensional buffers and chunked array access
//! - [`model`]: element types (rasters, points, shapes, tables)
//! - [`container`]: the [`SpatialData`] container
//! - [`validation`]: container validation and error reporting
//! - [`align`]: transformation resolution, alignment and bounding-box queries
//! - [`store`]: on-disk persistence
//! - [`inspect`]: container summaries
//! - [`error`]: error types

pub mod align;
pub mod array;
pub mod container;
pub mod error;
pub mod inspect;
pub mod model;
pub mod store;
pub mod transform;
pub mod validation;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::EnvFilter;

pub use container::SpatialData;
pub use error::{Result, SpatialDataError};

/// The spatialdata CLI application.
#[derive(Parser)]
#[command(name = "spatialdata")]
#[command(version, author, about)]
#[command(propagate_version = true)]
struct Cli {
    /// Log filter directives (e.g. 'info' or 'spatialdata::store=debug').
    #[arg(long, env = "SPATIALDATA_LOG", global = true)]
    log: Option<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Validate a stored container.
    Validate(ValidateArgs),
    /// Summarize a stored container.
    Inspect(InspectArgs),
    /// Select the parts of a stored container inside a bounding box.
    Query(QueryArgs),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Arguments for the validate subcommand.
#[derive(clap::Args)]
struct ValidateArgs {
    /// Store directory to validate.
    input: PathBuf,

    /// Treat warnings as errors (exit non-zero if any warnings).
    #[arg(long)]
    strict: bool,

    /// Require at most one table row per annotated geometry.
    #[arg(long)]
    one_to_one: bool,

    /// Only check metadata; do not load element payloads.
    #[arg(long)]
    structural: bool,

    /// Output format for the report.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
}

/// Arguments for the inspect subcommand.
#[derive(clap::Args)]
struct InspectArgs {
    /// Store directory to inspect.
    input: PathBuf,

    /// List transformations, not only their target systems.
    #[arg(long)]
    transformations: bool,

    /// Output format for the report.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
}

/// Arguments for the query subcommand.
#[derive(clap::Args)]
struct QueryArgs {
    /// Store directory to query.
    input: PathBuf,

    /// Coordinate system the bounding box is expressed in.
    #[arg(long)]
    system: String,

    /// Box corners as min values then max values, e.g. 'xmin,ymin,xmax,ymax'.
    #[arg(long, value_delimiter = ',', required = true, allow_hyphen_values = true)]
    bbox: Vec<f64>,

    /// Axes of the bounding box.
    #[arg(long, value_delimiter = ',', default_value = "x,y")]
    axes: Vec<String>,

    /// Fail instead of skipping elements with no path into the system.
    #[arg(long)]
    fail_on_missing: bool,

    /// Always read raster crops from the finest level.
    #[arg(long)]
    finest: bool,

    /// Write the result to this store directory.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Replace an existing container at --out.
    #[arg(long)]
    overwrite: bool,

    /// Output format for the summary.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
}

/// Run the spatialdata CLI.
///
/// This is the main entry point for the CLI, called from `main.rs`.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log.as_deref(), cli.verbose);

    match cli.command {
        Some(Commands::Validate(args)) => run_validate(args),
        Some(Commands::Inspect(args)) => run_inspect(args),
        Some(Commands::Query(args)) => run_query(args),
        None => {
            println!("spatialdata {}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Co-registered multi-modal spatial datasets.");
            println!();
            println!("Run 'spatialdata --help' for usage information.");
            Ok(())
        }
    }
}

/// Installs the stderr log subscriber. `-v` flags take precedence over the
/// filter from `--log`/`SPATIALDATA_LOG`; the default is `warn`.
fn init_tracing(filter: Option<&str>, verbose: u8) {
    let level = match verbose {
        0 => None,
        1 => Some("info"),
        2 => Some("debug"),
        _ => Some("trace"),
    };
    let directives = level.or(filter).unwrap_or("warn");
    let filter = EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(|source| SpatialDataError::MetadataWrite {
        path: "<stdout>".to_string(),
        source,
    })?;
    println!("{}", text);
    Ok(())
}

/// Execute the validate subcommand.
fn run_validate(args: ValidateArgs) -> Result<()> {
    // Read without the built-in check so the full report can be printed.
    let sd = store::read_from_directory(&args.input, &store::ReadOptions { validate: false })?;

    let opts = validation::ValidateOptions {
        strict: args.strict,
        cardinality: if args.one_to_one {
            model::CardinalityPolicy::OneToOne
        } else {
            model::CardinalityPolicy::ManyToOne
        },
        scope: if args.structural {
            validation::ValidationScope::Structural
        } else {
            validation::ValidationScope::Full
        },
        ..Default::default()
    };
    let report = validation::validate_container(&sd, &opts);

    match args.output {
        OutputFormat::Json => print_json(&serde_json::json!({
            "error_count": report.error_count(),
            "warning_count": report.warning_count(),
            "issues": report.issues,
        }))?,
        OutputFormat::Text => print!("{}", report),
    }

    let has_errors = report.error_count() > 0;
    let has_warnings = report.warning_count() > 0;

    if has_errors || (args.strict && has_warnings) {
        Err(SpatialDataError::Validation {
            error_count: report.error_count(),
            warning_count: report.warning_count(),
            report,
        })
    } else {
        Ok(())
    }
}

/// Execute the inspect subcommand.
fn run_inspect(args: InspectArgs) -> Result<()> {
    let sd = store::read_from_directory(&args.input, &store::ReadOptions::default())?;
    let opts = inspect::InspectOptions {
        show_transformations: args.transformations,
        ..Default::default()
    };
    let report = inspect::inspect_container(&sd, &opts);
    match args.output {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Text => {
            print!("{}", report);
            Ok(())
        }
    }
}

/// Execute the query subcommand.
fn run_query(args: QueryArgs) -> Result<()> {
    let n = args.axes.len();
    if args.bbox.len() != 2 * n {
        return Err(SpatialDataError::InvalidQuery {
            reason: format!(
                "--bbox needs {} values (min then max for axes {}), got {}",
                2 * n,
                args.axes.join(","),
                args.bbox.len()
            ),
        });
    }
    let axes: Vec<&str> = args.axes.iter().map(String::as_str).collect();
    let bbox = align::BoundingBox::new(&axes, &args.bbox[..n], &args.bbox[n..])?;

    let sd = store::read_from_directory(&args.input, &store::ReadOptions::default())?;
    let opts = align::QueryOptions {
        missing_path: if args.fail_on_missing {
            align::MissingPathPolicy::Fail
        } else {
            align::MissingPathPolicy::Skip
        },
        level_selection: if args.finest {
            align::LevelSelection::Finest
        } else {
            align::LevelSelection::default()
        },
        ..Default::default()
    };
    let result = align::query(&sd, &args.system, &bbox, &opts)?;
    debug!(kept = result.data.len(), skipped = result.skipped.len(), "query finished");

    if let Some(out) = &args.out {
        let save = store::SaveOptions {
            overwrite: args.overwrite,
            ..Default::default()
        };
        store::write_to_directory(out, &result.data, &save)?;
    }

    let report = inspect::inspect_container(&result.data, &inspect::InspectOptions::default());
    match args.output {
        OutputFormat::Json => print_json(&serde_json::json!({
            "result": report,
            "skipped": result.skipped,
        })),
        OutputFormat::Text => {
            print!("{}", report);
            if !result.skipped.is_empty() {
                println!();
                println!("Skipped {} element(s):", result.skipped.len());
                for s in &result.skipped {
                    println!("  [{}] {}: {}", s.kind, s.name, s.reason);
                }
            }
            Ok(())
        }
    }
}
