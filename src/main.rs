use clap::Parser;
use focuslog::cli::Cli;
use focuslog::logging::LoggingConfig;
use focuslog::store::StoreContext;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LoggingConfig::from_args(cli.quiet, cli.verbose, cli.json);
    if let Err(e) = focuslog::logging::init_logging(log_config) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    let store = match StoreContext::open().await {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Failed to open database: {}", e);
            std::process::exit(1);
        },
    };

    if let Err(e) = focuslog::cli::run(cli.command, cli.json, &store.pool).await {
        if cli.json {
            match serde_json::to_string_pretty(&e.to_error_response()) {
                Ok(body) => eprintln!("{}", body),
                Err(_) => eprintln!("{}", e),
            }
        } else {
            eprintln!("Error: {}", e);
        }
        std::process::exit(1);
    }
}
