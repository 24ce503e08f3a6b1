use anyhow::Context;
use clap::{Parser, Subcommand};
use comfy_table::{Table, presets::UTF8_FULL};
use configuration::{Config, ConfigArgs};
use core_types::{AggregationLevel, CalculationDefinition, ReportResult};
use reporting::{ExecutionOptions, Preview, SampleFilter};
use std::net::SocketAddr;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Compiles and runs deal and tranche reports from reusable calculation definitions.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API.
    Serve {
        /// Overrides `server.host`/`server.port`.
        #[arg(long)]
        addr: Option<SocketAddr>,
    },
    /// List the registered calculations.
    Calculations,
    /// Print the dependency order for a set of calculations.
    Resolve {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Show the SQL and parameters a stored template compiles to.
    Preview {
        #[arg(long)]
        template: String,
        #[arg(long)]
        cycle: i32,
    },
    /// Show the SQL for a single calculation over the sample filter.
    PreviewCalculation {
        name: String,
        #[arg(long)]
        cycle: Option<i32>,
        /// Comma-separated deal numbers; defaults to `preview.sample_deals`.
        #[arg(long, value_delimiter = ',')]
        deals: Option<Vec<i32>>,
        #[arg(long, value_enum)]
        level: Option<LevelArg>,
    },
    /// Run a stored template and print the result.
    Execute {
        #[arg(long)]
        template: String,
        #[arg(long)]
        cycle: i32,
        /// Overrides `execution.timeout_ms`.
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Print the result as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum LevelArg {
    Deal,
    Tranche,
}

impl From<LevelArg> for AggregationLevel {
    fn from(level: LevelArg) -> Self {
        match level {
            LevelArg::Deal => AggregationLevel::Deal,
            LevelArg::Tranche => AggregationLevel::Tranche,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli
        .config
        .load()
        .with_context(|| format!("loading {}", cli.config.config.display()))?;
    let _guard = init_tracing(&config);
    tracing::debug!(path = %cli.config.config.display(), "Configuration loaded.");

    match cli.command {
        Commands::Serve { addr } => {
            let addr = match addr {
                Some(addr) => addr,
                None => config.server.socket_addr()?,
            };
            web_server::run_server(config, addr).await
        }
        Commands::Calculations => {
            let state = web_server::build_state(&config).await?;
            print_calculations(&state.registry.all());
            Ok(())
        }
        Commands::Resolve { names } => {
            let state = web_server::build_state(&config).await?;
            for (position, name) in state.registry.resolve_names(&names)?.iter().enumerate() {
                println!("{:>3}. {name}", position + 1);
            }
            Ok(())
        }
        Commands::Preview { template, cycle } => {
            let state = web_server::build_state(&config).await?;
            let template = state.db_repo.get_template(&template).await?;
            print_preview(&state.service.preview_template(&template, cycle)?);
            Ok(())
        }
        Commands::PreviewCalculation {
            name,
            cycle,
            deals,
            level,
        } => {
            let state = web_server::build_state(&config).await?;
            let sample = SampleFilter {
                deals,
                tranche_ids: None,
                cycle_code: cycle,
                aggregation_level: level.map(Into::into),
            };
            print_preview(&state.service.preview_calculation(&name, &sample)?);
            Ok(())
        }
        Commands::Execute {
            template,
            cycle,
            timeout_ms,
            json,
        } => {
            let state = web_server::build_state(&config).await?;
            let template = state.db_repo.get_template(&template).await?;
            let options = ExecutionOptions {
                timeout: timeout_ms.map(Duration::from_millis),
                cancel: None,
            };
            let result = state
                .service
                .execute_template(&template, cycle, options)
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&result);
            }
            Ok(())
        }
    }
}

/// Console output plus a daily-rolling file in `logging.directory`.
///
/// `RUST_LOG` wins over `logging.level`. The returned guard flushes the file writer on drop.
fn init_tracing(config: &Config) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(&config.logging.directory, "reports.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    guard
}

fn print_calculations(definitions: &[CalculationDefinition]) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Name",
        "Function",
        "Source",
        "Level",
        "Depends on",
    ]);
    for definition in definitions {
        let source = match &definition.weight_field {
            Some(weight) => format!(
                "{}.{} (by {weight})",
                definition.source_model, definition.source_field
            ),
            None => format!("{}.{}", definition.source_model, definition.source_field),
        };
        table.add_row(vec![
            definition.name.clone(),
            definition.aggregation_function.to_string(),
            source,
            definition.group_level.to_string(),
            definition.dependencies.join(", "),
        ]);
    }
    println!("{table}");
}

fn print_preview(preview: &Preview) {
    println!("{}\n", preview.query.sql);
    for (index, param) in preview.query.params.iter().enumerate() {
        println!("${} = {param}", index + 1);
    }
    println!("\nJoin order: {}", preview.query.resolved_order.join(" -> "));
}

fn print_result(result: &ReportResult) {
    let mut table = Table::new();
    let mut header = vec!["dl_nbr".to_string()];
    if result.aggregation_level == AggregationLevel::Tranche {
        header.push("tr_id".to_string());
    }
    header.extend(result.columns.iter().cloned());
    table.load_preset(UTF8_FULL).set_header(header);

    for row in &result.rows {
        let mut cells = vec![row.key_fields.deal_number.to_string()];
        if result.aggregation_level == AggregationLevel::Tranche {
            cells.push(row.key_fields.tranche_id.clone().unwrap_or_default());
        }
        cells.extend(result.columns.iter().map(|column| {
            row.value(column)
                .map(ToString::to_string)
                .unwrap_or_else(|| "NULL".to_string())
        }));
        table.add_row(cells);
    }

    println!("{table}");
    println!(
        "{} rows, cycle {}, {} ms",
        result.row_count, result.cycle_code, result.execution_time_ms
    );
}
