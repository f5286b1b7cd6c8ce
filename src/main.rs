use clap::Parser;
use contactlink::cli::{run_identify, run_serve, run_show, Cli, Commands};
use contactlink::Config;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so `identify` output stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env(cli.db)?;

    match cli.command {
        Commands::Identify(args) => {
            let mut db = config.open_database()?;
            run_identify(&mut db, &config.reconciler(), args)?;
        }
        Commands::Show(args) => {
            let mut db = config.open_database()?;
            run_show(&mut db, &config.reconciler(), args.id)?;
        }
        Commands::Serve(args) => {
            if let Some(port) = args.port {
                config.port = port;
            }
            run_serve(config)?;
        }
    }

    Ok(())
}
