use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use catalog_search::{
    insert_manual_product, setup_database, sync_providers, verify_count, CatalogConfig, CatalogEntry,
    CatalogQuery, CatalogSearchOrchestrator, NewManualProduct, Owner, OwnerScope,
    ProviderFilter, ProviderVisibilityResolver, RawPrice,
};

#[derive(Parser)]
#[command(name = "catalog", version, about = "Search provider catalogs and the manual product list")]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = "catalog.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database schema and register configured providers
    Init,

    /// Search every visible source
    Search {
        /// Search term (whitespace-separated tokens, all must match)
        #[arg(default_value = "")]
        term: String,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        owner: Option<Owner>,
        /// Extra AND-token filter
        #[arg(long)]
        filter: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Hide a provider for an owner
    Hide {
        provider: String,
        #[arg(long)]
        owner: Owner,
    },

    /// Delete a provider for an owner (reactivates on fresh data)
    Delete {
        provider: String,
        #[arg(long)]
        owner: Owner,
    },

    /// Make a provider active again
    Restore {
        provider: String,
        #[arg(long)]
        owner: Owner,
    },

    /// Add a product to the manual catalog
    AddProduct {
        #[arg(long)]
        name: String,
        #[arg(long)]
        provider: String,
        #[arg(long)]
        owner: Owner,
        #[arg(long)]
        code: Option<String>,
        /// Stored as typed; parsed on read ("1.500,50", "consultar", ...)
        #[arg(long)]
        price: Option<String>,
        #[arg(long, default_value = "")]
        observations: String,
    },
}

fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("catalog_search=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = CatalogConfig::load(&cli.config)?;
    let conn = Connection::open(&config.storage.database).with_context(|| {
        format!("Failed to open database: {}", config.storage.database.display())
    })?;
    setup_database(&conn)?;

    match cli.command {
        Command::Init => run_init(&conn, &config),
        Command::Search {
            term,
            provider,
            owner,
            filter,
            json,
        } => run_search(&conn, &config, &term, provider, owner, filter, json),
        Command::Hide { provider, owner } => {
            ProviderVisibilityResolver::new(&conn).hide(&provider, owner)?;
            println!("🙈 {} hidden for {}", provider, owner);
            Ok(())
        }
        Command::Delete { provider, owner } => {
            let outcome = ProviderVisibilityResolver::new(&conn).delete(&provider, owner)?;
            println!("🗑️  {} deleted for {}", provider, owner);
            if outcome.provider_removed {
                println!("✓ Provider record removed (no owners, no manual products left)");
            }
            Ok(())
        }
        Command::Restore { provider, owner } => {
            ProviderVisibilityResolver::new(&conn).restore(&provider, owner)?;
            println!("✅ {} active again for {}", provider, owner);
            Ok(())
        }
        Command::AddProduct {
            name,
            provider,
            owner,
            code,
            price,
            observations,
        } => {
            let mut product = NewManualProduct::new(&name, &provider, owner).with_observations(&observations);
            if let Some(code) = code {
                product = product.with_code(&code);
            }
            if let Some(price) = price {
                product = product.with_price(RawPrice::Text(price));
            }
            let id = insert_manual_product(&conn, &product)?;
            println!("✓ Manual product #{} added", id);
            Ok(())
        }
    }
}

fn run_init(conn: &Connection, config: &CatalogConfig) -> Result<()> {
    println!("🗄️  Database ready ({})", config.storage.database.display());

    let created = sync_providers(conn, config)?;
    println!(
        "✓ {} providers configured, {} new owner associations",
        config.providers.len(),
        created
    );
    println!("✓ {} manual products stored", verify_count(conn)?);
    Ok(())
}

fn run_search(
    conn: &Connection,
    config: &CatalogConfig,
    term: &str,
    provider: Option<String>,
    owner: Option<Owner>,
    filter: Option<String>,
    json: bool,
) -> Result<()> {
    let engine = CatalogSearchOrchestrator::new(conn, config);

    let provider = match provider {
        Some(name) => engine.provider_filter(&name, owner)?,
        None => ProviderFilter::Any,
    };
    let query = CatalogQuery::new(term)
        .with_provider(provider)
        .with_owners(OwnerScope::from(owner))
        .with_extra_filter(filter);

    let outcome = engine.search_with_report(&query)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    print_table(&outcome.entries);
    for failed in outcome.report.failed_sources() {
        eprintln!(
            "⚠️  {} failed: {}",
            failed.label,
            failed.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn print_table(entries: &[CatalogEntry]) {
    if entries.is_empty() {
        println!("No matches");
        return;
    }

    println!(
        "{:<14} {:<48} {:>12} {:<16} {:<10} {:<11}",
        "CODE", "NAME", "PRICE", "PROVIDER", "OWNER", "SOURCE"
    );
    println!("{}", "━".repeat(116));
    for entry in entries {
        let price = match &entry.price_raw_text {
            Some(raw) => format!("? {}", raw),
            None => entry.price.to_string(),
        };
        println!(
            "{:<14} {:<48} {:>12} {:<16} {:<10} {:<11}",
            entry.code.as_deref().unwrap_or("-"),
            truncate(&entry.name, 48),
            price,
            truncate(&entry.provider, 16),
            entry.owner,
            format!("{:?}", entry.source_kind),
        );
    }
    println!("\n{} results", entries.len());
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
