//! # nerfprep CLI
//!
//! Prepares a folder of images for radiance-field training by running COLMAP
//! (or GLOMAP for mapping) and then `ns-process-data`, with every option
//! taken from a prep config file.
//!
//! ## Usage
//!
//! ```bash
//! nerfprep --config ./prep.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `nerfprep init` | Write a commented starter config |
//! | `nerfprep check` | Validate the config and print the commands a run would execute |
//! | `nerfprep run --output-dir <dir>` | Run SfM, then convert the result into a dataset |
//! | `nerfprep vocab-tree fetch` | Download the vocabulary tree for `vocab_tree` matching |
//! | `nerfprep vocab-tree path` | Print where the vocabulary tree is cached |
//!
//! ## Examples
//!
//! ```bash
//! # Exhaustive matching, quiet output, per-step logs in out/logs
//! nerfprep --config scene.toml run --output-dir out --log
//!
//! # Vocabulary-tree matching with an explicit tree, confirming each step
//! nerfprep --config scene.yaml run --output-dir out \
//!     --vocab-tree-path trees/flickr100k.fbow --prompt
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use nerf_prep::commands;
use nerf_prep::config;
use nerf_prep::pipeline::{self, PlanOptions, RunOutcome};
use nerf_prep::progress::ProgressMode;
use nerf_prep::prompt::{AlwaysYes, LinePrompter, Prompter};
use nerf_prep::runner::SystemRunner;
use nerf_prep::vocab_tree::{self, FetchOutcome, DEFAULT_VOCAB_TREE_URL};

/// nerfprep — prepare input data for radiance-field training via a config
/// file.
#[derive(Parser)]
#[command(
    name = "nerfprep",
    about = "Prepare input data for radiance-field training via a config file",
    version,
    long_about = "nerfprep reads a prep config (TOML, or YAML for .yaml/.yml files) and runs \
    COLMAP feature extraction and matching, COLMAP or GLOMAP mapping, and finally \
    ns-process-data to turn the sparse reconstruction into a training dataset."
)]
struct Cli {
    /// Path to the prep config file (TOML or YAML).
    #[arg(long, global = true, default_value = "./prep.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to `human` on a terminal, `off` otherwise.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline.
    ///
    /// Feature extraction, feature matching, and mapping run first; the
    /// resulting sparse model is then converted into a dataset under
    /// `--output-dir`. Steps run one at a time and the first failure stops
    /// the run.
    Run {
        /// Output directory for the sparse model and the converted dataset.
        #[arg(long)]
        output_dir: PathBuf,

        /// Vocabulary tree (`.fbow`), only needed when `matching_method` is `vocab_tree`.
        #[arg(long)]
        vocab_tree_path: Option<PathBuf>,

        /// Ask for confirmation before running each command.
        #[arg(short, long)]
        prompt: bool,

        /// Stream tool output to the terminal and log each command line.
        #[arg(short, long)]
        verbose: bool,

        /// Write each step's command and output to `<output-dir>/logs/<step>.log`.
        #[arg(short, long)]
        log: bool,

        /// Print the commands without running anything.
        #[arg(long)]
        dry_run: bool,

        /// Stop after mapping; do not run the dataset converter.
        #[arg(long)]
        skip_convert: bool,
    },

    /// Validate the config and print the commands a run would execute.
    Check {
        /// Output directory to plan for.
        #[arg(long, default_value = "./output")]
        output_dir: PathBuf,

        /// Vocabulary tree (`.fbow`), only needed when `matching_method` is `vocab_tree`.
        #[arg(long)]
        vocab_tree_path: Option<PathBuf>,
    },

    /// Write a commented starter config to the `--config` path.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Manage the vocabulary tree used for `vocab_tree` matching.
    VocabTree {
        #[command(subcommand)]
        action: VocabTreeAction,
    },
}

#[derive(Subcommand)]
enum VocabTreeAction {
    /// Download the vocabulary tree into the user data directory.
    Fetch {
        /// Destination file (must end in `.fbow`). Defaults to the cache path.
        #[arg(long)]
        dest: Option<PathBuf>,

        /// Source URL.
        #[arg(long, default_value = DEFAULT_VOCAB_TREE_URL)]
        url: String,

        /// Download again even if the file exists.
        #[arg(long)]
        force: bool,
    },
    /// Print the cache path `run` falls back to.
    Path,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let verbose = matches!(cli.command, Commands::Run { verbose: true, .. });
    init_tracing(verbose);

    match cli.command {
        Commands::Init { force } => {
            config::write_starter_config(&cli.config, force)?;
            println!("Wrote {}", cli.config.display());
        }
        Commands::VocabTree { action } => match action {
            VocabTreeAction::Fetch { dest, url, force } => {
                let dest = match dest {
                    Some(d) => d,
                    None => vocab_tree::default_cache_path().ok_or_else(|| {
                        anyhow::anyhow!("Cannot determine a data directory; pass --dest")
                    })?,
                };
                match vocab_tree::fetch(&url, &dest, force)? {
                    FetchOutcome::AlreadyPresent(path) => {
                        println!("Vocab tree already present: {}", path.display());
                    }
                    FetchOutcome::Downloaded { path, bytes } => {
                        println!("Downloaded {} bytes to {}", bytes, path.display());
                    }
                }
            }
            VocabTreeAction::Path => match vocab_tree::default_cache_path() {
                Some(path) => println!("{}", path.display()),
                None => anyhow::bail!("Cannot determine a data directory (HOME is not set)"),
            },
        },
        Commands::Check {
            output_dir,
            vocab_tree_path,
        } => {
            let cfg = config::load_config(&cli.config)?;
            let opts = PlanOptions {
                output_dir,
                vocab_tree_path,
                cached_vocab_tree: vocab_tree::default_cache_path(),
                ..Default::default()
            };
            let plan = pipeline::plan(&cfg, &opts)?;

            println!("config:          {}", cli.config.display());
            println!("train_method:    {}", cfg.train_method);
            println!("sfm_tool:        {}", cfg.sfm_tool);
            println!("matching_method: {}", cfg.matching_method);
            println!("camera_model:    {}", cfg.camera_model);
            println!("use_gpu:         {}", cfg.use_gpu.0);
            if let Some(tree) = &plan.vocab_tree {
                println!("vocab_tree:      {}", tree.display());
            }
            println!();
            plan.print();
        }
        Commands::Run {
            output_dir,
            vocab_tree_path,
            prompt,
            verbose,
            log,
            dry_run,
            skip_convert,
        } => {
            let cfg = config::load_config(&cli.config)?;
            let opts = PlanOptions {
                output_dir,
                vocab_tree_path,
                cached_vocab_tree: vocab_tree::default_cache_path(),
                skip_convert,
                log,
            };
            let plan = pipeline::plan(&cfg, &opts)?;

            if dry_run {
                plan.print();
                return Ok(());
            }

            let reporter = cli
                .progress
                .unwrap_or_else(ProgressMode::default_for_tty)
                .reporter();
            let mut prompter: Box<dyn Prompter> = if prompt {
                Box::new(LinePrompter::stdin())
            } else {
                Box::new(AlwaysYes)
            };

            let outcome = pipeline::execute(
                &plan,
                verbose,
                &mut SystemRunner,
                reporter.as_ref(),
                prompter.as_mut(),
            )?;

            match outcome {
                RunOutcome::Completed if skip_convert => {
                    println!("Sparse model written to {}", plan.sparse_dir.display());
                }
                RunOutcome::Completed => {
                    println!("Dataset written to {}", plan.output_dir.display());
                    println!(
                        "Next: {}",
                        commands::training_hint(&cfg, &plan.output_dir)
                    );
                }
                RunOutcome::Declined(step) => {
                    eprintln!("Not running {}. Exiting.", step.label());
                }
            }
        }
    }

    Ok(())
}
