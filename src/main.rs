//! minimiser CLI - Two-arm minimisation for stratified trial allocation.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use minimiser::pipeline::{allocate_all, load_participants, run_simulation};
use minimiser::{export_jsonl, Allocator, Arm, Config, LedgerStore, Schema};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "minimiser")]
#[command(version)]
#[command(about = "Two-arm minimisation with a biased coin for stratified trial allocation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "minimiser.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Allocate participants from a JSONL file
    Allocate {
        /// Path to input participants JSONL file
        #[arg(short, long)]
        participants: PathBuf,

        /// Ledger directory for resumable allocation
        #[arg(long)]
        ledger: Option<PathBuf>,

        /// Write the ledger as JSONL rows to this path
        #[arg(short, long)]
        export: Option<PathBuf>,
    },

    /// Allocate a synthetic cohort drawn from configured prevalences
    Simulate {
        /// Number of participants (overrides [simulation].participants)
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Seed for synthetic characteristics (overrides [simulation].seed)
        #[arg(short, long)]
        seed: Option<u64>,

        /// Write the ledger as JSONL rows to this path
        #[arg(short, long)]
        export: Option<PathBuf>,
    },

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

fn print_example_config() {
    // Schema from the BMJ minimisation example (Altman & Bland, 2005).
    let example = r#"# minimiser configuration file

[trial]
arms = ["A", "B"]
# Probability of skipping minimisation for a fair coin flip
true_randomization_probability = 0.20
# Seed the random source from the first participant id (reproducible,
# but not guessable in advance)
seed_first_with_id = true
# seed = 1234

[[variables]]
name = "sex"
categories = ["male", "female"]
prevalence = [3, 2]

[[variables]]
name = "age"
categories = ["<=50", ">50"]

[[variables]]
name = "ethnicity"
categories = ["white", "black", "asian"]
prevalence = [7, 1, 2]

[[variables]]
name = "smoker"
categories = ["no", "yes"]
prevalence = [3, 1]

[simulation]
participants = 160
seed = 42
"#;
    println!("{example}");
}

fn print_summary(allocator: &Allocator) {
    println!("\n=== {allocator} ===");
    for arm in Arm::ALL {
        println!(
            "{:<12} {}",
            format!("{}:", allocator.arm_label(arm)),
            allocator.arm_total(arm)
        );
    }
    println!("\n{}", allocator.balance_report());
}

fn load_config(cli: &Cli) -> Result<Config> {
    let config = Config::from_file(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match &cli.command {
        Commands::Example => {
            print_example_config();
        }

        Commands::Validate => {
            let config = load_config(&cli)?;
            let schema = Schema::from_specs(&config.variables).context("Invalid schema")?;

            info!("Configuration is valid");
            info!(
                "  Arms: {} / {}",
                config.trial.arms[0], config.trial.arms[1]
            );
            info!(
                "  Variables: {} ({})",
                schema.len(),
                config.variable_names().join(", ")
            );
            info!(
                "  True randomisation: {:.0}%",
                config.trial.true_randomization_probability * 100.0
            );
        }

        Commands::Allocate {
            participants,
            ledger,
            export,
        } => {
            let config = load_config(&cli)?;
            let schema = Schema::from_specs(&config.variables).context("Invalid schema")?;
            let records = load_participants(participants)?;

            let store = ledger
                .as_deref()
                .map(LedgerStore::new)
                .transpose()
                .context("Failed to open ledger")?;
            let mut allocator = match &store {
                Some(store) => store
                    .open_allocator(schema, config.trial.clone())
                    .context("Failed to restore ledger")?,
                None => Allocator::new(schema, config.trial.clone())?,
            };

            let stats = allocate_all(&mut allocator, records, true)?;
            if let Some(store) = &store {
                store.save(&allocator).context("Failed to save ledger")?;
            }
            if let Some(path) = export {
                export_jsonl(&allocator, path)?;
            }

            println!("\n=== Allocation Complete ===");
            println!("Records:     {}", stats.total_records);
            println!("Allocated:   {}", stats.total_allocated);
            println!("Duplicates:  {}", stats.total_duplicates);
            println!("Invalid:     {}", stats.total_invalid);
            println!("Runtime:     {:.3}s", stats.runtime_secs);
            print_summary(&allocator);
        }

        Commands::Simulate {
            count,
            seed,
            export,
        } => {
            let config = load_config(&cli)?;
            let (allocator, stats) = run_simulation(&config, *count, *seed)?;
            if let Some(path) = export {
                export_jsonl(&allocator, path)?;
            }

            println!("\n=== Simulation Complete ===");
            println!("Participants: {}", stats.total_allocated);
            println!("Max category difference: {}", allocator.balance_report().max_difference());
            print_summary(&allocator);
        }
    }

    Ok(())
}
