use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use common::config::Settings;
use etl::models::RunRef;
use lakehouse::processor::gold::types::{AggregateView, RegionCount};
use lakehouse::Lakehouse;
use serde::Serialize;
use std::process;

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .help("Sets a custom config file")
}

fn run_id_arg() -> Arg {
    Arg::new("run-id")
        .long("run-id")
        .value_name("RUN_ID")
        .help("Run id, formatted YYYYMMDD_HHMMSS")
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Could not render outcome: {}", e),
    }
}

fn load(matches: &ArgMatches) -> Result<Lakehouse> {
    let config_path = matches
        .get_one::<String>("config")
        .map(|s| s.as_str())
        .unwrap_or("config/pipeline.toml");
    let settings = Settings::new(config_path)
        .with_context(|| format!("loading settings from {}", config_path))?;
    common::telemetry::init_tracing(&settings.logging)?;
    Lakehouse::from_settings(settings).context("opening storage")
}

/// Runs one subcommand and returns whether it succeeded.
async fn dispatch(name: &str, matches: &ArgMatches) -> Result<bool> {
    let lakehouse = load(matches)?;
    match name {
        "bronze" => print_json(&lakehouse.bronze().await?),
        "silver" => {
            let run = match (
                matches.get_one::<String>("ingestion-date"),
                matches.get_one::<String>("run-id"),
            ) {
                (Some(date), Some(run_id)) => Some(RunRef::new(date.as_str(), run_id.as_str())),
                _ => None,
            };
            print_json(&lakehouse.silver(run).await?);
        }
        "gold" => {
            let run_id = matches.get_one::<String>("run-id").cloned();
            print_json(&lakehouse.gold(run_id).await?);
        }
        "validate" => {
            let validation = lakehouse.validate().await?;
            print_json(&validation);
            return Ok(validation.passed);
        }
        "run" => print_json(&lakehouse.run().await?),
        "history" => {
            let limit = matches.get_one::<usize>("limit").copied().unwrap_or(10);
            let mut views = serde_json::Map::new();
            for view in AggregateView::ALL {
                let commits = lakehouse.view_history(view, limit).await?;
                views.insert(view.table_name().to_string(), serde_json::to_value(commits)?);
            }
            print_json(&serde_json::json!({
                "cleaned": lakehouse.cleaned_history(limit).await?,
                "views": views,
            }));
        }
        "regions" => {
            let country = matches.get_one::<String>("country").map(|s| s.as_str());
            let regions: Vec<RegionCount> = lakehouse
                .region_counts(country)
                .await?
                .rows
                .iter()
                .map(|r| RegionCount {
                    country: r.key(0).unwrap_or_default().to_string(),
                    state_province: r.key(1).unwrap_or_default().to_string(),
                    brewery_count: r.count,
                })
                .collect();
            print_json(&regions);
        }
        other => {
            eprintln!("Unknown subcommand {}", other);
            return Ok(false);
        }
    }
    Ok(true)
}

#[tokio::main]
async fn main() {
    let matches = Command::new("Brewery Lakehouse")
        .version("1.0")
        .about("Moves the brewery catalogue through the raw, cleaned and aggregated layers")
        .subcommand_required(true)
        .subcommand(
            Command::new("bronze")
                .about("Fetch every page into a new raw run")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("silver")
                .about("Clean a raw run into the partitioned table")
                .arg(config_arg())
                .arg(
                    Arg::new("ingestion-date")
                        .long("ingestion-date")
                        .value_name("DATE")
                        .requires("run-id")
                        .help("Ingestion date of the run, YYYY-MM-DD; defaults to the latest run"),
                )
                .arg(run_id_arg().requires("ingestion-date")),
        )
        .subcommand(
            Command::new("gold")
                .about("Aggregate the cleaned table")
                .arg(config_arg())
                .arg(run_id_arg()),
        )
        .subcommand(
            Command::new("validate")
                .about("Check every layer and report")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("run")
                .about("Run every stage, validating after each")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("history")
                .about("List recent versions of the cleaned table and each view")
                .arg(config_arg())
                .arg(
                    Arg::new("limit")
                        .long("limit")
                        .value_name("N")
                        .value_parser(clap::value_parser!(usize))
                        .help("Versions to show per table"),
                ),
        )
        .subcommand(
            Command::new("regions")
                .about("Count breweries per region of the cleaned table")
                .arg(config_arg())
                .arg(
                    Arg::new("country")
                        .long("country")
                        .value_name("COUNTRY")
                        .help("Only count regions of this country"),
                ),
        )
        .get_matches();

    let Some((name, sub_matches)) = matches.subcommand() else {
        eprintln!("Please specify a valid subcommand");
        process::exit(1);
    };

    match dispatch(name, sub_matches).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Pipeline error in {}: {:#}", name, e);
            process::exit(1);
        }
    }
}
