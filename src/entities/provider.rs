// 🏭 Provider Entity - interned identity + display-name table
//
// Problem solved:
// - "Chiesa", "CHIESA", "chiésa" in manual rows, spreadsheet keys and
//   visibility records → one provider
// - Callers hold a ProviderId (cheap, typed) instead of passing strings around

use crate::error::Result;
use crate::model::Owner;
use crate::normalize::ProviderKey;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Interned provider handle (row id of the `providers` table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderId(pub i64);

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub id: ProviderId,
    /// Display name, as first registered
    pub name: String,
    pub key: ProviderKey,
    /// Owners this provider is associated with
    pub owners: BTreeSet<Owner>,
}

// ============================================================================
// PROVIDER REGISTRY
// ============================================================================

/// Point-in-time snapshot of the providers table
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    by_id: HashMap<ProviderId, ProviderRecord>,
    by_key: HashMap<ProviderKey, ProviderId>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        ProviderRegistry::default()
    }

    /// Load every provider and its owner associations
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut registry = ProviderRegistry::new();

        let mut stmt = conn.prepare("SELECT id, name FROM providers ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (id, name) in rows {
            registry.insert(ProviderRecord {
                id: ProviderId(id),
                key: ProviderKey::new(&name),
                name,
                owners: BTreeSet::new(),
            });
        }

        let mut stmt = conn.prepare("SELECT provider_id, owner FROM provider_owners")?;
        let links = stmt
            .query_map([], |row| Ok((ProviderId(row.get(0)?), row.get::<_, Owner>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (id, owner) in links {
            if let Some(record) = registry.by_id.get_mut(&id) {
                record.owners.insert(owner);
            }
        }

        Ok(registry)
    }

    pub fn insert(&mut self, record: ProviderRecord) {
        self.by_key.insert(record.key.clone(), record.id);
        self.by_id.insert(record.id, record);
    }

    pub fn get(&self, id: ProviderId) -> Option<&ProviderRecord> {
        self.by_id.get(&id)
    }

    /// Find by any spelling of the name
    pub fn lookup(&self, name: &str) -> Option<&ProviderRecord> {
        let key = ProviderKey::new(name);
        self.by_key.get(&key).and_then(|id| self.by_id.get(id))
    }

    pub fn key_of(&self, id: ProviderId) -> Option<&ProviderKey> {
        self.by_id.get(&id).map(|r| &r.key)
    }

    pub fn display_name(&self, key: &ProviderKey) -> Option<&str> {
        self.by_key
            .get(key)
            .and_then(|id| self.by_id.get(id))
            .map(|r| r.name.as_str())
    }

    /// All providers, ordered by id
    pub fn all(&self) -> Vec<&ProviderRecord> {
        let mut records: Vec<&ProviderRecord> = self.by_id.values().collect();
        records.sort_by_key(|r| r.id);
        records
    }

    pub fn count(&self) -> usize {
        self.by_id.len()
    }
}

/// Insert a provider by name unless an equal-normalizing one exists.
/// Returns the interned id either way.
pub fn intern_provider(conn: &Connection, name: &str) -> Result<ProviderId> {
    let key = ProviderKey::new(name);
    conn.execute(
        "INSERT OR IGNORE INTO providers (name, name_normalized) VALUES (?1, ?2)",
        params![name.trim(), key.as_str()],
    )?;
    let id: i64 = conn.query_row(
        "SELECT id FROM providers WHERE name_normalized = ?1",
        params![key.as_str()],
        |row| row.get(0),
    )?;
    Ok(ProviderId(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{register_provider, setup_database};

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_intern_is_spelling_insensitive() {
        let conn = setup();
        let a = intern_provider(&conn, "Chiesa").unwrap();
        let b = intern_provider(&conn, " CHIÉSA ").unwrap();
        let c = intern_provider(&conn, "Bahco").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_registry_load_with_owners() {
        let conn = setup();
        register_provider(&conn, "Chiesa", Owner::Ricky).unwrap();
        register_provider(&conn, "chiesa", Owner::Ferreteria).unwrap();
        register_provider(&conn, "Bahco", Owner::Ferreteria).unwrap();

        let registry = ProviderRegistry::load(&conn).unwrap();
        assert_eq!(registry.count(), 2);

        let chiesa = registry.lookup("CHIESA").unwrap();
        assert_eq!(chiesa.name, "Chiesa");
        assert_eq!(
            chiesa.owners.iter().copied().collect::<Vec<_>>(),
            vec![Owner::Ricky, Owner::Ferreteria]
        );
        assert_eq!(registry.key_of(chiesa.id), Some(&ProviderKey::new("chiesa")));
        assert_eq!(registry.display_name(&ProviderKey::new("bahco")), Some("Bahco"));
        assert!(registry.lookup("Stanley").is_none());
    }

    #[test]
    fn test_registry_all_is_ordered_by_id() {
        let mut registry = ProviderRegistry::new();
        for (id, name) in [(5, "Zeta"), (2, "Alfa")] {
            registry.insert(ProviderRecord {
                id: ProviderId(id),
                name: name.to_string(),
                key: ProviderKey::new(name),
                owners: BTreeSet::new(),
            });
        }
        let names: Vec<&str> = registry.all().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Alfa", "Zeta"]);
    }
}
