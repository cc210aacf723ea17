use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use nl2sql_lib::ollama::OllamaClient;
use nl2sql_lib::render::render_text;
use nl2sql_lib::{AppConfig, NlToSqlProcessor};

#[derive(Parser, Debug)]
#[command(name = "nl2sql", about = "Ask a database questions in plain language")]
struct Cli {
    /// Path to config file
    #[arg(short = 'c', long, global = true, env = "NL2SQL_CONFIG", default_value = "nl2sql.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Translate a request to SQL, run it, and print the response
    Query {
        /// Natural-language request
        text: String,

        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// Print the schema context sent to the model
    Context,

    /// Check that the model server is reachable
    Status,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let config = match AppConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(2);
        }
    };

    let code = match cli.command {
        Command::Query { ref text, format } => query(&config, text, format).await,
        Command::Context => context(&config).await,
        Command::Status => status(&config).await,
    };
    process::exit(code);
}

async fn query(config: &AppConfig, text: &str, format: OutputFormat) -> i32 {
    let processor = match NlToSqlProcessor::from_config(config) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 2;
        }
    };

    let response = processor.query_db(text).await;
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(&response) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: failed to serialize response: {}", e);
                return 1;
            }
        },
        OutputFormat::Text => print!("{}", render_text(&response)),
    }

    if response.is_success() {
        0
    } else {
        1
    }
}

async fn context(config: &AppConfig) -> i32 {
    let processor = match NlToSqlProcessor::from_config(config) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 2;
        }
    };

    match processor.build_context().await {
        Ok(ctx) => {
            print!("{}", ctx);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn status(config: &AppConfig) -> i32 {
    let client = OllamaClient::new(
        &config.model.base_url,
        &config.model.model,
        Duration::from_secs(config.model.request_timeout_secs),
    );
    let status = client.check_status().await;
    if !status.running {
        eprintln!("Ollama is not reachable at {}", config.model.base_url);
        return 1;
    }

    for m in &status.models {
        println!("{}\t{}", m.name, m.size);
    }
    if client.is_model_listed(&status.models) {
        println!("Configured model {} is available", client.model());
        0
    } else {
        eprintln!("Configured model {} is not pulled", client.model());
        1
    }
}
