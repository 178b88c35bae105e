// 🗄️ Relational schema + write helpers
//
// The engine only READS the manual catalog during search. The writes here
// back the curation tooling (CLI `add-product`), start-up provider sync and
// the tests.

use crate::config::CatalogConfig;
use crate::entities::provider::intern_provider;
use crate::entities::ProviderId;
use crate::error::Result;
use crate::model::Owner;
use crate::normalize::ProviderKey;
use crate::price::RawPrice;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for file databases; in-memory connections report "memory" and ignore it
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Providers (display-name table for interned ids) + owner associations
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS providers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            name_normalized TEXT UNIQUE NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS provider_owners (
            provider_id INTEGER NOT NULL REFERENCES providers(id) ON DELETE CASCADE,
            owner TEXT NOT NULL,
            UNIQUE(provider_id, owner)
        )",
        [],
    )?;

    // ==========================================================================
    // Manual catalog (price is untyped: legacy rows hold text prices)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS manual_products (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT,
            name TEXT NOT NULL,
            price,
            provider TEXT NOT NULL,
            provider_normalized TEXT NOT NULL,
            provider_id INTEGER REFERENCES providers(id) ON DELETE SET NULL,
            owner TEXT NOT NULL,
            observations TEXT NOT NULL DEFAULT '',
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Visibility overlay (absence of a row = Active)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS provider_visibility (
            provider_normalized TEXT NOT NULL,
            owner TEXT NOT NULL,
            state TEXT NOT NULL,
            deleted_at TEXT,
            PRIMARY KEY (provider_normalized, owner)
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_manual_owner ON manual_products(owner)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_manual_provider ON manual_products(provider_normalized, owner)",
        [],
    )?;

    Ok(())
}

pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ============================================================================
// PROVIDERS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderRegistration {
    pub provider_id: ProviderId,
    /// false when the (provider, owner) pair already existed
    pub association_created: bool,
}

/// Register a provider and its owner association.
///
/// Concurrent registrations of the same pair are safe: the UNIQUE
/// constraint rejects the duplicate and it is reported as already present.
pub fn register_provider(conn: &Connection, name: &str, owner: Owner) -> Result<ProviderRegistration> {
    let provider_id = intern_provider(conn, name)?;

    let result = conn.execute(
        "INSERT INTO provider_owners (provider_id, owner) VALUES (?1, ?2)",
        params![provider_id.0, owner],
    );

    let association_created = match result {
        Ok(_) => true,
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            false
        }
        Err(e) => return Err(e.into()),
    };

    Ok(ProviderRegistration {
        provider_id,
        association_created,
    })
}

/// Register every configured spreadsheet provider (idempotent)
pub fn sync_providers(conn: &Connection, config: &CatalogConfig) -> Result<usize> {
    let mut created = 0;
    for source in &config.providers {
        let registration = register_provider(conn, source.display_name(), source.owner)?;
        if registration.association_created {
            created += 1;
        }
    }
    tracing::debug!(created, total = config.providers.len(), "providers synced");
    Ok(created)
}

pub fn remove_association(conn: &Connection, key: &ProviderKey, owner: Owner) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM provider_owners
         WHERE owner = ?2
           AND provider_id IN (SELECT id FROM providers WHERE name_normalized = ?1)",
        params![key.as_str(), owner],
    )?;
    Ok(removed)
}

pub fn association_count(conn: &Connection, key: &ProviderKey) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM provider_owners po
         JOIN providers p ON p.id = po.provider_id
         WHERE p.name_normalized = ?1",
        params![key.as_str()],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn manual_reference_count(conn: &Connection, key: &ProviderKey) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM manual_products WHERE provider_normalized = ?1",
        params![key.as_str()],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn delete_provider_record(conn: &Connection, key: &ProviderKey) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM providers WHERE name_normalized = ?1",
        params![key.as_str()],
    )?;
    Ok(removed > 0)
}

// ============================================================================
// MANUAL PRODUCTS
// ============================================================================

/// A manual catalog row as written by the curation workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewManualProduct {
    pub code: Option<String>,
    pub name: String,
    /// Stored as typed as given: number, text or NULL
    #[serde(skip)]
    pub price: Option<RawPrice>,
    pub provider: String,
    pub owner: Owner,
    #[serde(default)]
    pub observations: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl NewManualProduct {
    pub fn new(name: &str, provider: &str, owner: Owner) -> Self {
        NewManualProduct {
            code: None,
            name: name.to_string(),
            price: None,
            provider: provider.to_string(),
            owner,
            observations: String::new(),
            updated_at: None,
        }
    }

    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }

    pub fn with_price(mut self, price: RawPrice) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_observations(mut self, observations: &str) -> Self {
        self.observations = observations.to_string();
        self
    }

    pub fn updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }
}

/// Insert a manual product; links it to the interned provider and ensures
/// the provider/owner association exists. Returns the row id.
pub fn insert_manual_product(conn: &Connection, product: &NewManualProduct) -> Result<i64> {
    let registration = register_provider(conn, &product.provider, product.owner)?;
    let key = ProviderKey::new(&product.provider);

    let price = match &product.price {
        None | Some(RawPrice::Empty) => Value::Null,
        Some(RawPrice::Number(n)) => Value::Real(*n),
        Some(RawPrice::Text(s)) => Value::Text(s.clone()),
    };
    let updated_at = timestamp(product.updated_at.unwrap_or_else(Utc::now));

    conn.execute(
        "INSERT INTO manual_products (
            code, name, price, provider, provider_normalized, provider_id,
            owner, observations, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            product.code,
            product.name,
            price,
            product.provider.trim(),
            key.as_str(),
            registration.provider_id.0,
            product.owner,
            product.observations,
            updated_at,
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

/// Rows in the manual catalog
pub fn verify_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM manual_products", [], |row| row.get(0))?;

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_setup_is_idempotent() {
        let conn = setup();
        setup_database(&conn).unwrap();
        assert_eq!(verify_count(&conn).unwrap(), 0);
    }

    #[test]
    fn test_duplicate_association_is_rejected_not_corrupted() {
        let conn = setup();

        let first = register_provider(&conn, "Chiesa", Owner::Ricky).unwrap();
        let second = register_provider(&conn, "CHIESA", Owner::Ricky).unwrap();

        assert!(first.association_created);
        assert!(!second.association_created, "second registration should be a no-op");
        assert_eq!(first.provider_id, second.provider_id);
        assert_eq!(association_count(&conn, &ProviderKey::new("chiesa")).unwrap(), 1);
    }

    #[test]
    fn test_insert_manual_product_keeps_price_type() {
        let conn = setup();

        let id = insert_manual_product(
            &conn,
            &NewManualProduct::new("Carbón para amoladora", "chiesa", Owner::Ricky)
                .with_code("CARBG7202")
                .with_price(RawPrice::Text("1.500,00".to_string())),
        )
        .unwrap();

        let (price, provider_normalized): (Value, String) = conn
            .query_row(
                "SELECT price, provider_normalized FROM manual_products WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(price, Value::Text("1.500,00".to_string()));
        assert_eq!(provider_normalized, "chiesa");
        assert_eq!(manual_reference_count(&conn, &ProviderKey::new("Chiesa")).unwrap(), 1);
        assert_eq!(verify_count(&conn).unwrap(), 1);
    }

    #[test]
    fn test_remove_association_and_orphan_cleanup() {
        let conn = setup();
        register_provider(&conn, "Bahco", Owner::Ricky).unwrap();
        register_provider(&conn, "Bahco", Owner::Ferreteria).unwrap();
        let key = ProviderKey::new("bahco");

        assert_eq!(remove_association(&conn, &key, Owner::Ricky).unwrap(), 1);
        assert_eq!(remove_association(&conn, &key, Owner::Ricky).unwrap(), 0);
        assert_eq!(association_count(&conn, &key).unwrap(), 1);

        assert!(delete_provider_record(&conn, &key).unwrap());
        assert!(!delete_provider_record(&conn, &key).unwrap());
    }

    #[test]
    fn test_timestamp_round_trip() {
        let now = Utc::now();
        let parsed = parse_timestamp(&timestamp(now)).unwrap();
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
        assert!(parse_timestamp("ayer").is_none());
    }
}
