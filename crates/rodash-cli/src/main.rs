use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use rodash_core::Dimension;
use rodash_engine::{activity_view, Detection, FilterCriteria, ViewMode, ViewRequest};
use rodash_storage::ProfileStore;
use rodash_sync::{RefreshConfig, RefreshPipeline};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "rodash")]
#[command(about = "Recruiting ops dashboard engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Pull every enabled source once and report what was loaded.
    Refresh {
        #[arg(long)]
        json: bool,
    },
    /// Refresh, then serve the JSON API on RODASH_WEB_PORT.
    Serve,
    /// Refresh, then run a detector profile over the activity table.
    Detect {
        /// Profile name; the stored default profile when omitted.
        #[arg(long)]
        profile: Option<String>,
        #[arg(long, value_enum, default_value_t = ModeArg::Aggregated)]
        mode: ModeArg,
        #[arg(long, value_enum, default_value_t = GroupArg::Recruiter)]
        group: GroupArg,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Reference day for previous-N-days windows.
        #[arg(long)]
        today: Option<NaiveDate>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Stub,
    Aggregated,
    Average,
}

impl From<ModeArg> for ViewMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Stub => ViewMode::Stub,
            ModeArg::Aggregated => ViewMode::Aggregated,
            ModeArg::Average => ViewMode::Average,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum GroupArg {
    Recruiter,
    Team,
    Company,
    Contract,
}

impl From<GroupArg> for Dimension {
    fn from(group: GroupArg) -> Self {
        match group {
            GroupArg::Recruiter => Dimension::Recruiter,
            GroupArg::Team => Dimension::Team,
            GroupArg::Company => Dimension::Company,
            GroupArg::Contract => Dimension::Contract,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Refresh { json: false }) {
        Commands::Refresh { json } => {
            let summary = rodash_sync::run_refresh_once_from_env().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
                return Ok(());
            }
            println!(
                "refresh complete: refresh_id={} sources={} failed={}",
                summary.refresh_id,
                summary.enabled_sources,
                summary.diagnostics.len()
            );
            for (table, rows) in summary.store.counts() {
                println!("  {table:<18} {rows}");
            }
            for diagnostic in &summary.diagnostics {
                println!("  ! {}: {}", diagnostic.kind.as_str(), diagnostic.message);
            }
            if let Some(version) = &summary.update_notice {
                println!("new dashboard version available: {version}");
            }
        }
        Commands::Serve => rodash_web::serve_from_env().await?,
        Commands::Detect {
            profile,
            mode,
            group,
            from,
            to,
            today,
        } => {
            let pipeline = RefreshPipeline::new(RefreshConfig::from_env())?;
            let book = pipeline
                .profiles()
                .load()
                .await
                .context("loading detector profiles")?;
            let chosen = match &profile {
                Some(name) => book.profile(name),
                None => book.active(),
            }
            .with_context(|| match &profile {
                Some(name) => format!("no detector profile named {name}"),
                None => "no default detector profile set".to_string(),
            })?;

            let summary = pipeline.run_once().await?;
            let request = ViewRequest {
                criteria: chosen.filters.apply_to(FilterCriteria {
                    from,
                    to,
                    ..FilterCriteria::default()
                }),
                mode: mode.into(),
                group_key: group.into(),
                ..ViewRequest::default()
            };
            let detection = Detection {
                rules: &chosen.rules,
                today: today.unwrap_or_else(|| Utc::now().date_naive()),
            };
            let output = activity_view(&summary.store.activity, &request, Some(detection));
            let mut flagged = 0usize;
            for (row, tag) in output.rows.iter().zip(&output.tags) {
                if let Some(tag) = tag {
                    flagged += 1;
                    let when = row.date.map(|d| d.to_string()).unwrap_or_default();
                    println!("{tag:<16} {:<24} {when}", row.group);
                }
            }
            println!("{flagged} of {} rows flagged", output.rows.len());
        }
    }

    Ok(())
}
