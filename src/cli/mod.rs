use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod identify;
pub mod server;

pub use identify::{run_identify, run_show};
pub use server::{run_serve, IdentifyServer};

#[derive(Parser)]
#[command(name = "contactlink")]
#[command(about = "Reconcile contacts into identity clusters by email and phone number")]
#[command(version)]
pub struct Cli {
    /// Database file (overrides CONTACTLINK_DB)
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Reconcile one observation and print the resulting cluster
    Identify(IdentifyArgs),
    /// Print the cluster a contact belongs to
    Show(ShowArgs),
    /// Serve POST /identify over HTTP
    Serve(ServeArgs),
}

#[derive(Args)]
pub struct IdentifyArgs {
    #[arg(short, long)]
    pub email: Option<String>,
    #[arg(short, long)]
    pub phone: Option<String>,
}

#[derive(Args)]
pub struct ShowArgs {
    /// Contact id (primary or secondary)
    pub id: i64,
}

#[derive(Args)]
pub struct ServeArgs {
    /// Port to listen on (overrides CONTACTLINK_PORT)
    #[arg(short, long)]
    pub port: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_identify() {
        let cli = Cli::parse_from([
            "contactlink",
            "--db",
            "/tmp/c.db",
            "identify",
            "--email",
            "a@x.com",
            "-p",
            "111",
        ]);
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/c.db")));
        match cli.command {
            Commands::Identify(args) => {
                assert_eq!(args.email.as_deref(), Some("a@x.com"));
                assert_eq!(args.phone.as_deref(), Some("111"));
            }
            _ => panic!("expected identify"),
        }
    }

    #[test]
    fn test_parse_serve_and_show() {
        let cli = Cli::parse_from(["contactlink", "serve", "--port", "8080"]);
        assert!(matches!(cli.command, Commands::Serve(ServeArgs { port: Some(8080) })));

        let cli = Cli::parse_from(["contactlink", "show", "42", "--db", "x.db"]);
        assert!(matches!(cli.command, Commands::Show(ShowArgs { id: 42 })));
        assert_eq!(cli.db, Some(PathBuf::from("x.db")));
    }
}
