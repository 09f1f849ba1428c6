mod aggregate;
mod config;
mod error;
mod estimator;
mod ingest;
mod merge;
mod models;
mod pricing;
mod projection;
mod report;
mod service;
mod table;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use crate::config::{data_dir, ensure_initialized, load_config};
use error::AppError;
use estimator::ChatScenario;
use report::{parse_format, EstimateView, OutputFormat};
use service::TallyService;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "llm-tally")]
#[command(about = "LLM API cost estimator and usage report generator")]
struct Cli {
    /// Log debug output to stderr.
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init,
    Pricing {
        #[arg(long, default_value = "text")]
        format: String,
    },
    Estimate {
        #[arg(long)]
        model: String,
        #[arg(long)]
        input_tokens: u64,
        #[arg(long)]
        output_tokens: u64,
        #[arg(long, default_value_t = 0)]
        cache_tokens: u64,
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Cost of a chat workload: users x chats x tokens per chat.
    Calculate {
        #[arg(long, default_value = "gpt-4o-mini")]
        model: String,
        #[arg(long, default_value_t = 10)]
        users: u64,
        #[arg(long, default_value_t = 15)]
        chats_per_user: u64,
        #[arg(long, default_value_t = 1000)]
        input_per_chat: u64,
        #[arg(long, default_value_t = 300)]
        output_per_chat: u64,
        #[arg(long, default_value = "text")]
        format: String,
    },
    Merge {
        #[arg(long)]
        dir: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    Report {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
        #[arg(long, default_value = "text")]
        format: String,
    },
    Project {
        #[arg(long)]
        avg_daily_cost: f64,
        #[arg(long)]
        chat_volume: Option<f64>,
        #[arg(long, value_delimiter = ',')]
        users: Vec<u64>,
        #[arg(long, default_value = "text")]
        format: String,
    },
    Export {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("llm_tally=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn parse_date(input: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::Config(format!("Invalid date '{input}'. Use YYYY-MM-DD.")))
}

fn parse_optional_date(input: Option<&str>) -> Result<Option<NaiveDate>, AppError> {
    input.map(parse_date).transpose()
}

fn check_non_negative(name: &str, value: f64) -> Result<f64, AppError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(AppError::Config(format!("{name} must be a non-negative number.")))
    }
}

fn merged_input(svc: &TallyService, input: Option<PathBuf>) -> Result<PathBuf, AppError> {
    match input {
        Some(path) => Ok(path),
        None => Ok(svc.merged_path(&data_dir()?)),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    debug!(command = ?cli.command, "starting");

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<(), AppError> {
    match command {
        Commands::Init => {
            ensure_initialized()?;
            println!("Initialized llm-tally config and data directories.");
            println!("Config: {}", crate::config::config_path()?.display());
            println!("Data:   {}", data_dir()?.display());
        }
        Commands::Pricing { format } => {
            let format = parse_format(&format)?;
            let svc = TallyService::new(load_config()?)?;
            println!("{}", report::render_pricing(format, svc.pricing())?);
        }
        Commands::Estimate {
            model,
            input_tokens,
            output_tokens,
            cache_tokens,
            format,
        } => {
            let format = parse_format(&format)?;
            let svc = TallyService::new(load_config()?)?;
            let breakdown =
                svc.estimator()
                    .breakdown(&model, input_tokens, output_tokens, cache_tokens)?;
            let view = EstimateView {
                model: crate::config::normalize_model_name(&model),
                input_tokens,
                output_tokens,
                cache_tokens,
                breakdown,
            };
            println!("{}", report::render_estimate(format, &view)?);
        }
        Commands::Calculate {
            model,
            users,
            chats_per_user,
            input_per_chat,
            output_per_chat,
            format,
        } => {
            let format = parse_format(&format)?;
            let svc = TallyService::new(load_config()?)?;
            let scenario = ChatScenario {
                model: crate::config::normalize_model_name(&model),
                users,
                chats_per_user,
                avg_input_tokens_per_chat: input_per_chat,
                avg_output_tokens_per_chat: output_per_chat,
                cache_tokens: 0,
            };
            let estimate = svc.estimator().estimate_scenario(&scenario)?;
            println!("{}", report::render_scenario(format, &estimate)?);
        }
        Commands::Merge { dir, output } => {
            let svc = TallyService::new(load_config()?)?;
            let dir = match dir {
                Some(dir) => dir,
                None => data_dir()?,
            };
            let summary = svc.merge_directory(&dir, output.as_deref())?;
            println!(
                "Merged {} usage rows from {} files and {} cost rows from {} files into {} rows at {}",
                summary.usage_rows,
                summary.usage_files,
                summary.cost_rows,
                summary.cost_files,
                summary.merged_rows,
                summary.output.display()
            );
        }
        Commands::Report {
            input,
            from,
            to,
            format,
        } => {
            let format = parse_format(&format)?;
            let from = parse_optional_date(from.as_deref())?;
            let to = parse_optional_date(to.as_deref())?;
            let svc = TallyService::new(load_config()?)?;
            let input = merged_input(&svc, input)?;
            let report = svc.report(&input, from, to)?;
            println!("{}", report::render_report(format, &report)?);
        }
        Commands::Project {
            avg_daily_cost,
            chat_volume,
            users,
            format,
        } => {
            let format = parse_format(&format)?;
            let avg_daily_cost = check_non_negative("--avg-daily-cost", avg_daily_cost)?;
            let svc = TallyService::new(load_config()?)?;
            let model = svc.projection_model()?;
            let volume = match chat_volume {
                Some(v) => check_non_negative("--chat-volume", v)?,
                None => model.estimate_chat_volume(avg_daily_cost),
            };
            let users = if users.is_empty() {
                model.settings().user_counts.clone()
            } else {
                users
            };
            let projection = model.project(avg_daily_cost, volume, &users);
            if format == OutputFormat::Text {
                println!(
                    "Average daily cost: ${} over ~{:.0} chats/day",
                    report::money(avg_daily_cost),
                    volume
                );
            }
            println!("{}", report::render_projection(format, &projection)?);
        }
        Commands::Export { input, from, to } => {
            let from = parse_optional_date(from.as_deref())?;
            let to = parse_optional_date(to.as_deref())?;
            let svc = TallyService::new(load_config()?)?;
            let input = merged_input(&svc, input)?;
            let stdout = std::io::stdout();
            svc.export(&input, from, to, stdout.lock())?;
        }
    }

    Ok(())
}
