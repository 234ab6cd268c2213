use std::{env, process};

use sqlitecascade::{
    SchemaRegistry, SqliteStore,
    client::{CascadeClient, CommandLineConfig},
};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "sqlitecascade=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        println!("{}", CommandLineConfig::help());
        return;
    }
    let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
    let config = match CommandLineConfig::from_args(&arg_refs) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("error: {err}");
            process::exit(2);
        }
    };

    let client = match open_client(&config) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("{err}");
            process::exit(2);
        }
    };

    let root = match config.root_selection() {
        Ok(root) => root,
        Err(err) => {
            eprintln!("error: {err}");
            process::exit(2);
        }
    };

    match client.execute(&config.command, &root, &config.options()) {
        Ok(output) => match serde_json::to_string_pretty(&output) {
            Ok(text) => println!("{text}"),
            Err(err) => {
                eprintln!("command failed: {err}");
                process::exit(1);
            }
        },
        Err(err) => {
            eprintln!("command failed: {err}");
            if let Some(original) = err.original() {
                eprintln!("caused by: {original}");
            }
            process::exit(1);
        }
    }
}

fn open_client(config: &CommandLineConfig) -> Result<CascadeClient<SqliteStore>, String> {
    let schema = config
        .schema
        .as_deref()
        .ok_or_else(|| "error: --schema is required".to_string())?;
    let registry = SchemaRegistry::from_json_file(schema).map_err(|e| e.to_string())?;
    let store = if config.database == "memory" {
        SqliteStore::open_in_memory()
    } else {
        SqliteStore::open(&config.database)
    }
    .map_err(|e| e.to_string())?;
    Ok(CascadeClient::new(registry, store))
}
