use anyhow::bail;
use clap::{Parser, Subcommand};
use journal::{
    config::{redact_url, Settings},
    storage, telemetry,
};
use journal_core::{pending_migrations, run_migrations};

/// Offline schema migrations. Reads the same environment as the server and
/// connects with the synchronous-driver URL.
#[derive(Parser, Debug)]
#[command(name = "journal-migrate", about = "Apply Journal API database migrations")]
struct MigrateArgs {
    /// Database connection string (overrides DATABASE_URL)
    #[arg(short, long)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Apply all pending migrations (default)
    Up,
    /// List applied and pending migrations
    Status,
}

fn main() -> anyhow::Result<()> {
    let args = MigrateArgs::parse();
    let mut settings = Settings::from_env()?;
    if let Some(url) = args.database_url {
        settings.database.url = Some(url);
    }
    telemetry::init_logging(&settings);

    let url = settings.sync_database_url();
    tracing::info!(url = %redact_url(&url), "Using database URL");

    let backend = storage::open(&url)?;
    let Some((migrator, migrations)) = backend.migrator() else {
        bail!("the {} backend has no schema to migrate", backend.name());
    };

    match args.command.unwrap_or(Command::Up) {
        Command::Up => {
            let applied = run_migrations(migrator, migrations)?;
            if applied.is_empty() {
                tracing::info!("Schema is up to date");
            } else {
                tracing::info!(?applied, "Migrations applied");
            }
        }
        Command::Status => {
            let applied = migrator.applied_versions()?;
            for migration in migrations.iter().filter(|m| applied.contains(&m.version)) {
                println!("applied  {:>4}  {}", migration.version, migration.name);
            }
            for migration in pending_migrations(&applied, migrations) {
                println!("pending  {:>4}  {}", migration.version, migration.name);
            }
        }
    }

    Ok(())
}
