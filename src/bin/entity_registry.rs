//! Entity registry batch runner
//!
//! Reads JSON-lines mentions, builds the registry and writes it as JSON.
//! The batch summary goes to stdout.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use entity_registry::mention::read_jsonl;
use entity_registry::{
    BatchPipeline, BiographyIndex, CheckpointStore, Classifiers, PipelineConfig, Registry,
    RegistryError, SkippedMention,
};

/// Command-line options
#[derive(Debug, Default)]
struct Args {
    /// Mentions file (JSON lines)
    input: PathBuf,
    /// Registry output file
    output: PathBuf,
    /// Checkpoint file; resumable when set
    checkpoint: Option<PathBuf>,
    /// Biographies file (JSON object of name to text)
    biographies: Option<PathBuf>,
    /// Discard any existing checkpoint first
    fresh: bool,
    /// Reclassify entities that already carry a type
    force: bool,
}

fn usage() {
    println!("entity-registry - canonical entity registry builder");
    println!();
    println!("USAGE:");
    println!("    entity-registry --input <FILE> --output <FILE> [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -i, --input <FILE>          Mentions, one JSON object per line");
    println!("    -o, --output <FILE>         Where to write the registry JSON");
    println!("    -c, --checkpoint <FILE>     Checkpoint file for resumable runs");
    println!("    -b, --biographies <FILE>    JSON object mapping names to biographies");
    println!("        --fresh                 Delete the checkpoint before starting");
    println!("        --force                 Reclassify already classified entities");
    println!("    -h, --help                  Print help information");
    println!();
    println!("Other settings are read from ENTITY_REGISTRY_* environment variables.");
}

fn parse_args() -> Result<Args, String> {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let mut args = Args::default();
    let mut input = None;
    let mut output = None;

    let mut iter = argv.into_iter();
    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| {
            iter.next()
                .map(PathBuf::from)
                .ok_or_else(|| format!("{flag} requires a value"))
        };
        match arg.as_str() {
            "--input" | "-i" => input = Some(value("--input")?),
            "--output" | "-o" => output = Some(value("--output")?),
            "--checkpoint" | "-c" => args.checkpoint = Some(value("--checkpoint")?),
            "--biographies" | "-b" => args.biographies = Some(value("--biographies")?),
            "--fresh" => args.fresh = true,
            "--force" => args.force = true,
            "--help" | "-h" => {
                usage();
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }

    args.input = input.ok_or("--input is required")?;
    args.output = output.ok_or("--output is required")?;
    Ok(args)
}

fn run(args: &Args) -> Result<(), RegistryError> {
    let mut config = PipelineConfig::from_env()?;
    config.force_reclassify |= args.force;

    let taxonomy = config.load_taxonomy()?;
    let classifiers = Classifiers::from_config(&config, taxonomy, None, None)?;
    info!(
        tiers = ?classifiers.types.tier_sources(),
        taxonomy = %classifiers.taxonomy().version,
        "classifiers ready"
    );

    let mut pipeline = BatchPipeline::new(config, Registry::in_memory(), classifiers);
    if let Some(path) = &args.checkpoint {
        let store = CheckpointStore::new(path);
        if args.fresh {
            store.clear()?;
        }
        pipeline = pipeline.with_checkpoint(store);
    }
    if let Some(path) = &args.biographies {
        let index = BiographyIndex::from_json_path(path)?;
        info!(entries = index.len(), "biographies loaded");
        pipeline = pipeline.with_biographies(Arc::new(index));
    }

    let parsed = read_jsonl(BufReader::new(File::open(&args.input)?))?;
    let mut mentions = Vec::with_capacity(parsed.len());
    let mut rejected = Vec::new();
    for item in parsed {
        match item {
            Ok(mention) => mentions.push(mention),
            Err(e) => rejected.push(SkippedMention::rejected(&e)),
        }
    }
    info!(mentions = mentions.len(), unparseable = rejected.len(), "input read");

    let summary = pipeline.run_with_rejected(&mentions, rejected)?;

    let snapshot = pipeline.snapshot()?;
    snapshot.write_json(BufWriter::new(File::create(&args.output)?))?;
    info!(
        path = %args.output.display(),
        entities = snapshot.entities.len(),
        "registry written"
    );

    serde_json::to_writer_pretty(std::io::stdout().lock(), &summary)
        .map_err(|e| RegistryError::internal(format!("serialize summary: {e}")))?;
    println!();
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("error: {message}");
            eprintln!("run with --help for usage");
            return ExitCode::from(2);
        }
    };

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_config() => {
            error!(error = %e, "configuration error");
            ExitCode::from(2)
        }
        Err(e) => {
            error!(error = %e, "batch failed");
            ExitCode::FAILURE
        }
    }
}
