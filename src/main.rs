use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use barctl::channel::{Command, CommandChannel, DEBUG_LEVEL_COMMAND};
use barctl::core::{ArchiveType, DispatchError, PauseModes, SyncEngine};
use barctl::{cli, config, context, logging};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "barctl")]
#[command(about = "Monitor and control a backup server", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Options that override the configuration file.
#[derive(Args, Serialize)]
struct GlobalArgs {
    /// Configuration file
    #[serde(skip)]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Server address (host:port)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    server: Option<String>,

    /// Use the built-in simulated server
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[arg(long, global = true)]
    simulation: bool,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[arg(long, short, global = true)]
    verbose: bool,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive dashboard (default)
    Watch,
    /// List jobs
    Jobs {
        #[arg(long)]
        json: bool,
    },
    /// Start a job
    Start {
        name: String,
        #[arg(long = "type", default_value = "normal")]
        archive_type: ArchiveType,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        no_storage: bool,
        /// Crypt password, for jobs that ask for one
        #[arg(long)]
        password: Option<String>,
    },
    /// Abort a running job
    Abort { name: String },
    /// Pause the server; without mode flags everything is paused
    Pause {
        seconds: u64,
        #[arg(long)]
        create: bool,
        #[arg(long)]
        storage: bool,
        #[arg(long)]
        restore: bool,
        #[arg(long)]
        index_update: bool,
        #[arg(long)]
        index_maintenance: bool,
    },
    /// Suspend a running server or continue a paused one
    Toggle,
    /// Reset a job's state
    Reset { name: String },
    /// Load or unload a volume
    Volume {
        #[command(subcommand)]
        action: VolumeCommand,
    },
    /// Run a job's schedule now
    Trigger { name: String, schedule: String },
    /// List a job's schedules
    Schedules { name: String },
    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
enum VolumeCommand {
    Load { name: String, number: u32 },
    Unload { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::AppConfig::load(cli.global.config.as_deref(), Some(&cli.global))
        .context("Failed to load configuration")?;
    let command = cli.command.unwrap_or(Commands::Watch);

    // The dashboard owns the terminal; it only logs to a file.
    if !matches!(command, Commands::Watch) || config.log_file.is_some() {
        logging::init(config.log_config()).context("Failed to initialize logging")?;
    }

    if let Commands::Config = command {
        print!("{}", config.to_toml().context("Failed to render configuration")?);
        return Ok(());
    }

    let ctx = context::AppContext::new(config);
    run(ctx, command).await
}

async fn run(ctx: context::AppContext, command: Commands) -> Result<()> {
    if let Commands::Watch = command {
        let server = if ctx.config.simulation {
            "simulation".to_string()
        } else {
            ctx.config.server.clone()
        };
        return cli::tui::run(ctx.engine(), server).await;
    }

    ctx.channel
        .execute(&Command::new("STATUS"), DEBUG_LEVEL_COMMAND)
        .await
        .with_context(|| format!("Cannot reach server at {}", ctx.config.server))?;

    let mut engine = ctx.engine();
    engine.refresh().await.context("Failed to read server state")?;

    match command {
        Commands::Jobs { json } => print_jobs(&engine, json)?,
        Commands::Start {
            name,
            archive_type,
            dry_run,
            no_storage,
            password,
        } => {
            select(&mut engine, &name).await?;
            let dispatcher = engine.dispatcher();
            let result = match password {
                Some(password) => {
                    dispatcher
                        .start_with_password(archive_type, no_storage, dry_run, &password)
                        .await
                }
                None => dispatcher.start(archive_type, no_storage, dry_run).await,
            };
            match result {
                Err(DispatchError::PasswordRequired { job }) => {
                    bail!("job '{}' needs a crypt password, pass --password", job)
                }
                result => {
                    result?;
                }
            }
            println!("Started '{}' ({})", name, archive_type);
        }
        Commands::Abort { name } => {
            select(&mut engine, &name).await?;
            engine.dispatcher().abort().await?;
            println!("Aborted '{}'", name);
        }
        Commands::Pause {
            seconds,
            create,
            storage,
            restore,
            index_update,
            index_maintenance,
        } => {
            let mut modes = PauseModes {
                create,
                storage,
                restore,
                index_update,
                index_maintenance,
            };
            if modes.is_empty() {
                modes = PauseModes::all();
            }
            engine.dispatcher().pause(seconds, modes).await?;
            println!("Paused {} for {}s", modes.to_mask(), seconds);
        }
        Commands::Toggle => {
            let state = engine.dispatcher().suspend_or_continue().await?;
            println!("Server {}", state.label());
        }
        Commands::Reset { name } => {
            select(&mut engine, &name).await?;
            engine.dispatcher().reset().await?;
            println!("Reset '{}'", name);
        }
        Commands::Volume {
            action: VolumeCommand::Load { name, number },
        } => {
            select(&mut engine, &name).await?;
            engine.dispatcher().load_volume(number).await?;
            println!("Loaded volume {} for '{}'", number, name);
        }
        Commands::Volume {
            action: VolumeCommand::Unload { name },
        } => {
            select(&mut engine, &name).await?;
            engine.dispatcher().unload_volume().await?;
            println!("Unloaded volume for '{}'", name);
        }
        Commands::Trigger { name, schedule } => {
            select(&mut engine, &name).await?;
            engine.dispatcher().trigger_schedule(&schedule).await?;
            println!("Triggered schedule {} of '{}'", schedule, name);
        }
        Commands::Schedules { name } => {
            select(&mut engine, &name).await?;
            for schedule in engine.schedule_entries() {
                println!("{}  {}", schedule.uuid, schedule);
            }
        }
        Commands::Watch | Commands::Config => {}
    }

    Ok(())
}

async fn select(engine: &mut SyncEngine, name: &str) -> Result<()> {
    let job = engine
        .job_by_name(name)
        .with_context(|| format!("No job named '{}'", name))?;
    engine.select_job(Some(job.uuid)).await;
    Ok(())
}

fn print_jobs(engine: &SyncEngine, json: bool) -> Result<()> {
    let jobs = engine.list_jobs();
    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }

    println!("Server {}", engine.current_server_run_state().label());
    println!(
        "{:<20} {:<24} {:<12} {:>10} {:<16} {:<10} {:<17} {:>9}",
        "NAME", "STATE", "TYPE", "PART SIZE", "COMPRESS", "CRYPT", "LAST RUN", "REMAINING"
    );
    for job in &jobs {
        println!(
            "{:<20} {:<24} {:<12} {:>10} {:<16} {:<10} {:<17} {:>9}",
            job.name,
            engine.display_state(job),
            job.archive_type.as_str(),
            job.part_size_text(),
            job.compression_text(),
            job.crypt_text(),
            job.last_executed_text(),
            job.estimated_text()
        );
    }
    Ok(())
}
