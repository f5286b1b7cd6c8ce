pub mod cli;
pub mod config;
pub mod db;
pub mod models;
pub mod reconcile;

pub use config::Config;
pub use db::Database;
pub use reconcile::{IdentifyError, Reconciler};
