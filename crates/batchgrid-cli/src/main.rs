use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "batchctl",
    about = "batchgrid: run batches of tasks on grid engine, Slurm or a local pool",
    version,
    propagate_version = true
)]
struct Cli {
    /// Log batchgrid at debug level and scan local job output for errors.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch every task of a params file and wait for all results.
    Submit(TaskArgs),
    /// Finish an earlier submit, running only tasks without a result.
    Resume(TaskArgs),
    /// Number of scheduler jobs still listed under a job name.
    Status {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        job_name: String,
    },
    /// Cancel every scheduler job with the given job name.
    Cancel {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        job_name: String,
    },
    /// Report which backend a submit would use right now.
    Probe {
        #[arg(short, long)]
        config: PathBuf,
    },
}

/// Arguments shared by `submit` and `resume`.
#[derive(Args, Debug, Clone)]
pub struct TaskArgs {
    /// Path to batchgrid.toml
    #[arg(short, long)]
    pub config: PathBuf,
    /// Batch name; selects the worker program and the job folder.
    #[arg(short, long)]
    pub name: String,
    /// JSON file with an array of tasks. Each task is an array of values;
    /// a bare value is a task with that single value.
    #[arg(short, long)]
    pub params: PathBuf,
    #[arg(long, default_value = "")]
    pub suffix: String,
    #[arg(long)]
    pub job_name: Option<String>,
    #[arg(long, default_value_t = 1)]
    pub cores: u32,
    #[arg(long)]
    pub max_concurrent: Option<usize>,
    #[arg(long)]
    pub max_rounds: Option<u32>,
    /// Grid engine priority (-1024..=1023).
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub priority: i32,
    /// Extra scheduler flags; replaces `scheduler.additional_flags`.
    #[arg(long, allow_hyphen_values = true)]
    pub flags: Option<String>,
    #[arg(long)]
    pub queue: Option<String>,
    #[arg(long)]
    pub pe: Option<String>,
    /// Run on the local pool even if a scheduler is reachable.
    #[arg(long)]
    pub local: bool,
    /// Do not add a computed --mem request (Slurm).
    #[arg(long)]
    pub no_mem_flag: bool,
    #[arg(long)]
    pub allow_resubmit_all_fail: bool,
    /// Mail the user when each round's jobs are done (Slurm).
    #[arg(long)]
    pub notify: bool,
    /// Copy result artifacts into this directory as result_<id>.pkl.
    #[arg(long)]
    pub collect: Option<PathBuf>,
    /// Delete job folders after a successful run.
    #[arg(long, requires = "collect")]
    pub remove_jobfolder: bool,
    /// Print the dispatch report as JSON.
    #[arg(long)]
    pub json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter(cli.verbose))),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Submit(args) => commands::submit::run(&args, false).await,
        Commands::Resume(args) => commands::submit::run(&args, true).await,
        Commands::Status { config, job_name } => commands::queue::status(&config, &job_name).await,
        Commands::Cancel { config, job_name } => commands::queue::cancel(&config, &job_name).await,
        Commands::Probe { config } => commands::queue::probe(&config).await,
    }
}

/// Filter used when `RUST_LOG` is unset. Debug output of the batchgrid crates
/// also switches on the scan of local job output, so only `--verbose` may
/// raise it.
fn default_filter(verbose: bool) -> &'static str {
    if verbose { "info,batchgrid=debug" } else { "info" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn debug_logging_only_with_verbose() {
        use tracing_subscriber::EnvFilter;
        use tracing_subscriber::filter::LevelFilter;

        let quiet = EnvFilter::new(default_filter(false));
        assert_eq!(quiet.max_level_hint(), Some(LevelFilter::INFO));
        let loud = EnvFilter::new(default_filter(true));
        assert_eq!(loud.max_level_hint(), Some(LevelFilter::DEBUG));

        let cli = Cli::try_parse_from(["batchctl", "--verbose", "probe", "-c", "b.toml"]).unwrap();
        assert!(cli.verbose);
    }

    #[test]
    fn remove_jobfolder_requires_collect() {
        let parsed = Cli::try_parse_from([
            "batchctl", "submit", "-c", "b.toml", "-n", "mesh", "-p", "t.json", "--remove-jobfolder",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn negative_priority_and_flags_parse() {
        let cli = Cli::try_parse_from([
            "batchctl", "submit", "-c", "b.toml", "-n", "mesh", "-p", "t.json", "--priority", "-10",
            "--flags", "-V -l h_vmem=4G",
        ])
        .unwrap();
        match cli.command {
            Commands::Submit(args) => {
                assert_eq!(args.priority, -10);
                assert_eq!(args.flags.as_deref(), Some("-V -l h_vmem=4G"));
                assert_eq!(args.cores, 1);
            }
            _ => panic!("expected submit"),
        }
    }
}
