use clap::{Command, Arg};
use std::process;


#[tokio::main]
async fn main() {
    let matches = Command::new("Brewery Ingestion")
        .version("1.0")
        .about("Fetches the brewery catalogue into the raw layer")
        .subcommand(
            Command::new("bronze")
                .about("Run one ingestion into the raw layer")
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .value_name("FILE")
                        .help("Sets a custom config file"),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("bronze", bronze_matches)) => {
            let config_path = bronze_matches.get_one::<String>("config")
                .map(|s| s.as_str())
                .unwrap_or("config/pipeline.toml");

            match etl::run_etl_pipeline(config_path).await {
                Ok(outcome) => match serde_json::to_string_pretty(&outcome) {
                    Ok(json) => println!("{}", json),
                    Err(e) => eprintln!("Could not render outcome: {}", e),
                },
                Err(e) => {
                    eprintln!("Ingestion error: {}", e);
                    process::exit(1);
                }
            }
        },

        _ => {
            eprintln!("Please specify a valid subcommand");
            process::exit(1);
        }
    }
}
