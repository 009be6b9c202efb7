use clap::{Parser, Subcommand};
use miette::Result;
use policy_adapter::model::section_of;
use policy_adapter::{storage, Adapter, BatchFilter, PolicyAdapter, RuleRow, Settings};
use sea_orm::Condition;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "policy-adapter",
    version,
    about = "Manage access-control policy rules stored in SQL"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the rule table and its unique index
    Migrate,
    /// Print stored rules, one per line
    List {
        /// JSON filter: an object of column -> [values], or an array of them
        #[arg(long)]
        filter: Option<String>,
    },
    /// Add one rule
    Add {
        ptype: String,
        #[arg(required = true)]
        values: Vec<String>,
    },
    /// Remove the rule with exactly these values
    Remove {
        ptype: String,
        #[arg(required = true)]
        values: Vec<String>,
    },
    /// Remove every rule matching the non-empty values from a field index on
    RemoveFiltered {
        ptype: String,
        #[arg(long, default_value_t = 0)]
        field_index: usize,
        #[arg(required = true)]
        values: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let mut settings = Settings::load(&cli.config)?;
    if matches!(cli.command, Command::Migrate) {
        settings.database.auto_migrate = true;
    }
    tracing::debug!(?settings, "Loaded configuration");

    let adapter = Adapter::from_settings(&settings).await?;
    let result = run(&adapter, cli.command).await;
    adapter.close().await?;
    result
}

async fn run(adapter: &Adapter, command: Command) -> Result<()> {
    match command {
        Command::Migrate => {
            tracing::info!("Rule table is up to date");
        }
        Command::List { filter } => {
            let rows = match filter {
                Some(raw) => {
                    let batch = BatchFilter::from_json(&raw)?;
                    storage::find_filtered_rules(adapter.connection(), &batch).await?
                }
                None => storage::find_rules(adapter.connection(), Condition::all()).await?,
            };
            for row in rows.iter().map(RuleRow::decode) {
                println!("{}", row.join(", "));
            }
        }
        Command::Add { ptype, values } => {
            let added = adapter
                .add_policy(section_of(&ptype), &ptype, &values)
                .await?;
            tracing::info!(%ptype, added, "Add rule");
        }
        Command::Remove { ptype, values } => {
            let removed = adapter
                .remove_policy(section_of(&ptype), &ptype, &values)
                .await?;
            tracing::info!(%ptype, removed, "Remove rule");
        }
        Command::RemoveFiltered {
            ptype,
            field_index,
            values,
        } => {
            let removed = adapter
                .remove_filtered_policy(section_of(&ptype), &ptype, field_index, &values)
                .await?;
            tracing::info!(%ptype, field_index, removed, "Remove filtered rules");
        }
    }
    Ok(())
}
