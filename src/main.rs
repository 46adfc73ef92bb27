// src/main.rs
//! pkgforge - CLI entry point

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;

use commands::BuildOptions;

#[derive(Parser)]
#[command(name = "pkgforge")]
#[command(version)]
#[command(about = "A package-building engine: staged recipes, cached builds, multi-target fan-out", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log filter, e.g. `debug` or `pkgforge=trace`
    #[arg(long, global = true, default_value = "info")]
    log: String,
}

#[derive(Args)]
struct CommonArgs {
    /// Path to the recipe file (shell or declarative)
    recipe: PathBuf,

    /// Working directory for build/source/package trees
    #[arg(long)]
    workdir: Option<PathBuf>,

    /// Where to write the finished artifact(s)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Build cache directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Build cache size limit in bytes
    #[arg(long, default_value_t = 10 * 1024 * 1024 * 1024)]
    cache_size: u64,

    /// Sign the artifact with this key id
    #[arg(long)]
    sign_key: Option<String>,

    /// Fail if any of these packages is installed
    #[arg(long = "conflict")]
    conflicts: Vec<String>,

    /// Skip the installed-package dependency and conflict probes
    #[arg(long)]
    no_probe: bool,
}

impl CommonArgs {
    fn options(&self) -> BuildOptions {
        BuildOptions {
            workdir: self.workdir.clone(),
            output: self.output.clone(),
            cache_dir: self.cache_dir.clone(),
            cache_size: self.cache_size,
            sign_key: self.sign_key.clone(),
            conflicts: self.conflicts.clone(),
            no_probe: self.no_probe,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build a recipe into a package artifact
    Build {
        #[command(flatten)]
        args: CommonArgs,
    },

    /// Compose an artifact from an already-staged package directory
    Package {
        #[command(flatten)]
        args: CommonArgs,

        /// The staged package directory
        #[arg(long)]
        package_dir: PathBuf,
    },

    /// Remove the working directory (and optionally the build cache)
    Clean {
        #[command(flatten)]
        args: CommonArgs,

        /// Also clear the build cache
        #[arg(long)]
        cache: bool,
    },

    /// Build a recipe for multiple targets in parallel
    Targets {
        #[command(flatten)]
        args: CommonArgs,

        /// Target spec label:triple[:opt[:features]] (repeatable)
        #[arg(long = "target")]
        targets: Vec<String>,

        /// Maximum concurrent target builds
        #[arg(long, default_value_t = 4)]
        max_parallel: usize,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone())),
        )
        .with_target(false)
        .init();

    let result = match &cli.command {
        Commands::Build { args } => commands::cmd_build(&args.recipe, &args.options()),
        Commands::Package { args, package_dir } => {
            commands::cmd_package(&args.recipe, package_dir, &args.options())
        }
        Commands::Clean { args, cache } => commands::cmd_clean(&args.recipe, &args.options(), *cache),
        Commands::Targets {
            args,
            targets,
            max_parallel,
        } => commands::cmd_targets(&args.recipe, targets, *max_parallel, &args.options()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // One human-readable line naming the kind and the offending
            // entity; engine errors keep their stable exit codes
            match err.downcast_ref::<pkgforge::Error>() {
                Some(engine) => {
                    eprintln!("error[{}]: {}", engine.kind_id(), engine);
                    ExitCode::from(engine.exit_code().clamp(0, 255) as u8)
                }
                None => {
                    eprintln!("error: {:#}", err);
                    ExitCode::FAILURE
                }
            }
        }
    }
}
