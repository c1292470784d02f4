mod app;
mod state;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use app::App;
use state::{Action, ControllerState};
use warp_core::config::ControllerConfig;
use warp_core::job::JobSnapshot;

/// Drives one or more `warp-agent` instances: open an interactive shell
/// against one, fan a command out across every configured target, or
/// replay an imported batch — standing in for the out-of-scope TUI.
#[derive(Parser, Debug)]
#[command(name = "warp-controller", version, about)]
struct Cli {
    /// Path to a TOML file of `[[targets]]`, used by `run-all`.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open an interactive shell against one agent.
    Connect { addr: String },
    /// Run one command against a single agent and print its output.
    Exec {
        addr: String,
        #[arg(trailing_var_arg = true, required = true)]
        cmd: Vec<String>,
    },
    /// Run one command against every configured target concurrently.
    RunAll {
        #[arg(trailing_var_arg = true, required = true)]
        cmd: Vec<String>,
    },
    /// Replay a command batch file against one agent.
    Import { addr: String, file: PathBuf },
    /// List every job this process has seen.
    Jobs,
    /// Print one job's full output.
    Job { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut app = App::new();

    match cli.command {
        Command::Connect { addr } => run_shell(&mut app, &addr).await?,
        Command::Exec { addr, cmd } => {
            let connection_id = app.connect(&addr).await?;
            let line = cmd.join(" ");
            let job_id = app.exec(connection_id, &line).await?;
            let job = app.job(job_id).await.expect("just-completed job is registered");
            print_job_detail(&job);
        }
        Command::RunAll { cmd } => {
            let targets = load_targets(cli.config.as_deref()).await?;
            for target in &targets {
                app.connect(target.address.to_string()).await?;
            }
            let line = cmd.join(" ");
            let job_ids = app.run_all(&line);
            info!(count = job_ids.len(), "dispatched to every connection");
            for job_id in job_ids {
                let job = app.wait_for(job_id).await;
                print_job_detail(&job);
            }
        }
        Command::Import { addr, file } => {
            let connection_id = app.connect(&addr).await?;
            let names = app.import(connection_id, &file).await?;
            info!(commands = names.len(), "batch replay finished");
            for job in app.jobs().await {
                print_job_summary(&job);
            }
        }
        Command::Jobs => {
            // A fresh process never has prior history — job records live
            // only in this run's in-memory registry, per the non-goal on
            // durable job history across controller restarts.
            for job in app.jobs().await {
                print_job_summary(&job);
            }
        }
        Command::Job { id } => {
            println!("no job {id} in this process's history (job history is not durable across runs)");
        }
    }

    app.shutdown().await;
    Ok(())
}

async fn load_targets(config: Option<&std::path::Path>) -> anyhow::Result<Vec<warp_core::config::Target>> {
    let path = config.ok_or_else(|| anyhow::anyhow!("run-all requires --config pointing at a targets file"))?;
    let cfg = ControllerConfig::load(path).await?;
    if cfg.targets.is_empty() {
        anyhow::bail!("{} lists no targets", path.display());
    }
    Ok(cfg.targets)
}

/// The interactive shell driving [`ControllerState`] for real: one
/// connection, a `jobs`/`job <id>` pair of read-only sub-views, and
/// `back`/`quit` to retrace the page stack.
async fn run_shell(app: &mut App, addr: &str) -> anyhow::Result<()> {
    let connection_id = app.connect(addr).await?;
    let mut state = ControllerState::Shell;
    let mut listed: Vec<JobSnapshot> = Vec::new();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print_prompt(state);
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match state {
            ControllerState::Shell | ControllerState::ConnectionList => match line {
                "quit" | "exit" => break,
                "jobs" => {
                    listed = app.jobs().await;
                    for job in &listed {
                        print_job_summary(job);
                    }
                    state = state.apply(Action::Jobs);
                }
                _ => {
                    let job_id = app.exec(connection_id, line).await?;
                    let job = app.job(job_id).await.expect("just-completed job is registered");
                    print_job_detail(&job);
                }
            },
            ControllerState::JobList => match line {
                "back" => state = state.apply(Action::Escape),
                other => match other.parse::<usize>().ok().and_then(|n| n.checked_sub(1)).and_then(|i| listed.get(i)) {
                    Some(job) => {
                        print_job_detail(job);
                        state = state.apply(Action::SelectJob);
                    }
                    None => println!("unknown job index {other:?}; type a number from the list above or \"back\""),
                },
            },
            ControllerState::JobDetail => {
                if line == "back" {
                    state = state.apply(Action::Escape);
                } else {
                    println!("type \"back\" to return to the job list");
                }
            }
            // A single-connection session never pushes NewConnection/RunAll/
            // Import — those belong to a multi-connection session this
            // shell doesn't model. Treat them as the session root if ever
            // reached.
            _ => state = ControllerState::Shell,
        }
    }

    app.delete(connection_id).await;
    Ok(())
}

fn print_prompt(state: ControllerState) {
    let label = match state {
        ControllerState::Shell | ControllerState::ConnectionList => "shell",
        ControllerState::JobList => "jobs",
        ControllerState::JobDetail => "job",
        _ => "controller",
    };
    print!("{label}> ");
    use std::io::Write;
    let _ = std::io::stdout().flush();
}

fn print_job_summary(job: &JobSnapshot) {
    let status = job
        .return_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "running".to_owned());
    println!("{} [{}] {}", job.id, status, job.command_label);
}

fn print_job_detail(job: &JobSnapshot) {
    print_job_summary(job);
    if !job.stdout.is_empty() {
        print!("{}", String::from_utf8_lossy(&job.stdout));
    }
    if !job.stderr.is_empty() {
        eprint!("{}", String::from_utf8_lossy(&job.stderr));
    }
}
