//! ArchivArt maintenance CLI

mod commands;

use anyhow::Context;
use archivart_store::seed::DEFAULT_ADMIN_EMAIL;
use archivart_store::Database;
use clap::{Parser, Subcommand};
use commands::{EntityKind, ListKind};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Maintenance commands for an ArchivArt database
#[derive(Debug, Parser)]
#[command(name = "archivart-admin", version, about)]
struct Cli {
    /// SQLite database path
    #[arg(long, global = true, env = "ARCHIVART_DATABASE", default_value = "archivart.db")]
    database: PathBuf,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Migrate, seed the RBAC catalog if empty and bootstrap the admin account
    Setup {
        /// Administrator email
        #[arg(long, default_value = DEFAULT_ADMIN_EMAIL)]
        email: String,
        /// Administrator password
        #[arg(long, env = "ARCHIVART_ADMIN_PASSWORD")]
        password: String,
    },
    /// Rebuild the built-in RBAC catalog and re-grant it to the system roles
    ResetRbac,
    /// Delete an entity with everything that depends on it
    Delete {
        /// Entity kind
        #[arg(value_enum)]
        kind: EntityKind,
        /// Row id
        id: i64,
        /// Only print what would be removed
        #[arg(long)]
        dry_run: bool,
    },
    /// List entities
    List {
        /// Entity kind
        #[arg(value_enum)]
        kind: ListKind,
    },
    /// Replace the password of an admin account
    SetAdminPassword {
        /// Administrator email
        #[arg(long)]
        email: String,
        /// New password
        #[arg(long, env = "ARCHIVART_ADMIN_PASSWORD")]
        password: String,
    },
    /// List admin accounts with their status and roles
    CheckAdmins,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let db = Database::open(&cli.database)
        .with_context(|| format!("opening database {}", cli.database.display()))?;
    let mut out = std::io::stdout().lock();
    let format = if cli.json {
        commands::Format::Json
    } else {
        commands::Format::Text
    };

    match cli.command {
        Command::Setup { email, password } => commands::setup(&db, &email, &password, format, &mut out),
        Command::ResetRbac => commands::reset_rbac(&db, format, &mut out),
        Command::Delete { kind, id, dry_run } => commands::delete(&db, kind, id, dry_run, format, &mut out),
        Command::List { kind } => commands::list(&db, kind, format, &mut out),
        Command::SetAdminPassword { email, password } => {
            commands::set_admin_password(&db, &email, &password, &mut out)
        }
        Command::CheckAdmins => commands::check_admins(&db, format, &mut out),
    }
}
