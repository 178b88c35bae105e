// 👁️ Provider Visibility - tri-state overlay per (provider, owner)
//
// Active  → no record (default)
// Hidden  → never visible
// Deleted → invisible unless fresh evidence exists right now (implicit
//           reactivation, for the current query only; reads never clear
//           the stored state)

use crate::db::{
    association_count, delete_provider_record, manual_reference_count, parse_timestamp, register_provider,
    remove_association, timestamp,
};
use crate::error::Result;
use crate::manual::ManualCatalogStore;
use crate::model::Owner;
use crate::normalize::ProviderKey;
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisibilityState {
    #[default]
    Active,
    Hidden,
    Deleted,
}

impl VisibilityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisibilityState::Active => "active",
            VisibilityState::Hidden => "hidden",
            VisibilityState::Deleted => "deleted",
        }
    }
}

impl fmt::Display for VisibilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for VisibilityState {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for VisibilityState {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "active" => Ok(VisibilityState::Active),
            "hidden" => Ok(VisibilityState::Hidden),
            "deleted" => Ok(VisibilityState::Deleted),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisibilityRecord {
    pub key: ProviderKey,
    pub owner: Owner,
    pub state: VisibilityState,
    /// Set for Deleted
    pub deleted_at: Option<DateTime<Utc>>,
}

// ============================================================================
// EVIDENCE
// ============================================================================

/// Is there data for (provider, owner) newer than `since`?
/// `since == None` asks whether any data is present at all.
pub trait VisibilityEvidence {
    fn has_fresh_evidence(&self, key: &ProviderKey, owner: Owner, since: Option<DateTime<Utc>>) -> bool;
}

/// No evidence ever: Deleted stays invisible
pub struct NoEvidence;

impl VisibilityEvidence for NoEvidence {
    fn has_fresh_evidence(&self, _key: &ProviderKey, _owner: Owner, _since: Option<DateTime<Utc>>) -> bool {
        false
    }
}

impl VisibilityEvidence for ManualCatalogStore<'_> {
    fn has_fresh_evidence(&self, key: &ProviderKey, owner: Owner, since: Option<DateTime<Utc>>) -> bool {
        match self.has_entries_since(key, owner, since) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(provider = %key, %owner, error = %e, "evidence lookup failed");
                false
            }
        }
    }
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Point-in-time copy of the visibility table, taken once per search
#[derive(Debug, Clone, Default)]
pub struct VisibilitySnapshot {
    records: HashMap<(ProviderKey, Owner), VisibilityRecord>,
}

impl VisibilitySnapshot {
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut stmt = conn.prepare(
            "SELECT provider_normalized, owner, state, deleted_at FROM provider_visibility",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(VisibilityRecord {
                    key: ProviderKey::new(&row.get::<_, String>(0)?),
                    owner: row.get(1)?,
                    state: row.get(2)?,
                    deleted_at: row
                        .get::<_, Option<String>>(3)?
                        .as_deref()
                        .and_then(parse_timestamp),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut snapshot = VisibilitySnapshot::default();
        for record in rows {
            snapshot.insert(record);
        }
        Ok(snapshot)
    }

    pub fn insert(&mut self, record: VisibilityRecord) {
        self.records.insert((record.key.clone(), record.owner), record);
    }

    pub fn record(&self, key: &ProviderKey, owner: Owner) -> Option<&VisibilityRecord> {
        self.records.get(&(key.clone(), owner))
    }

    pub fn state(&self, key: &ProviderKey, owner: Owner) -> VisibilityState {
        self.record(key, owner).map(|r| r.state).unwrap_or_default()
    }

    pub fn is_visible(&self, key: &ProviderKey, owner: Owner, evidence: &dyn VisibilityEvidence) -> bool {
        match self.record(key, owner) {
            None => true,
            Some(record) => match record.state {
                VisibilityState::Active => true,
                VisibilityState::Hidden => false,
                VisibilityState::Deleted => evidence.has_fresh_evidence(key, owner, record.deleted_at),
            },
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ============================================================================
// RESOLVER (mutations)
// ============================================================================

/// What `delete` cleaned up besides the visibility record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeleteOutcome {
    pub association_removed: bool,
    pub provider_removed: bool,
}

pub struct ProviderVisibilityResolver<'a> {
    conn: &'a Connection,
}

impl<'a> ProviderVisibilityResolver<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        ProviderVisibilityResolver { conn }
    }

    pub fn snapshot(&self) -> Result<VisibilitySnapshot> {
        VisibilitySnapshot::load(self.conn)
    }

    pub fn state(&self, name: &str, owner: Owner) -> Result<VisibilityState> {
        Ok(self.snapshot()?.state(&ProviderKey::new(name), owner))
    }

    /// Visibility for a single lookup; searches take one snapshot instead
    pub fn is_visible(&self, name: &str, owner: Owner, evidence: &dyn VisibilityEvidence) -> Result<bool> {
        Ok(self
            .snapshot()?
            .is_visible(&ProviderKey::new(name), owner, evidence))
    }

    pub fn hide(&self, name: &str, owner: Owner) -> Result<()> {
        let key = ProviderKey::new(name);
        self.conn.execute(
            "INSERT INTO provider_visibility (provider_normalized, owner, state, deleted_at)
             VALUES (?1, ?2, ?3, NULL)
             ON CONFLICT(provider_normalized, owner)
             DO UPDATE SET state = excluded.state, deleted_at = NULL",
            params![key.as_str(), owner, VisibilityState::Hidden],
        )?;
        tracing::info!(provider = %key, %owner, "provider hidden");
        Ok(())
    }

    /// Mark Deleted (timestamp = now), drop the owner association, and remove
    /// the provider record when nothing references it any more.
    pub fn delete(&self, name: &str, owner: Owner) -> Result<DeleteOutcome> {
        self.delete_at(name, owner, Utc::now())
    }

    pub fn delete_at(&self, name: &str, owner: Owner, at: DateTime<Utc>) -> Result<DeleteOutcome> {
        let key = ProviderKey::new(name);
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "INSERT INTO provider_visibility (provider_normalized, owner, state, deleted_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(provider_normalized, owner)
             DO UPDATE SET state = excluded.state, deleted_at = excluded.deleted_at",
            params![key.as_str(), owner, VisibilityState::Deleted, timestamp(at)],
        )?;

        let mut outcome = DeleteOutcome {
            association_removed: remove_association(&tx, &key, owner)? > 0,
            provider_removed: false,
        };
        if association_count(&tx, &key)? == 0 && manual_reference_count(&tx, &key)? == 0 {
            outcome.provider_removed = delete_provider_record(&tx, &key)?;
        }
        tx.commit()?;

        tracing::info!(
            provider = %key,
            %owner,
            association_removed = outcome.association_removed,
            provider_removed = outcome.provider_removed,
            "provider deleted"
        );
        Ok(outcome)
    }

    /// Back to Active: drop the record and re-create the owner association
    pub fn restore(&self, name: &str, owner: Owner) -> Result<()> {
        let key = ProviderKey::new(name);
        let tx = self.conn.unchecked_transaction()?;
        let removed = tx.execute(
            "DELETE FROM provider_visibility WHERE provider_normalized = ?1 AND owner = ?2",
            params![key.as_str(), owner],
        )?;
        register_provider(&tx, name, owner)?;
        tx.commit()?;

        tracing::info!(provider = %key, %owner, was_overridden = removed > 0, "provider restored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_manual_product, setup_database, NewManualProduct};
    use chrono::Duration;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    /// Evidence that exists only after a fixed instant
    struct DataAt(DateTime<Utc>);

    impl VisibilityEvidence for DataAt {
        fn has_fresh_evidence(&self, _key: &ProviderKey, _owner: Owner, since: Option<DateTime<Utc>>) -> bool {
            since.map_or(true, |s| self.0 > s)
        }
    }

    #[test]
    fn test_absent_record_is_active() {
        let conn = setup();
        let resolver = ProviderVisibilityResolver::new(&conn);
        assert!(resolver.is_visible("Chiesa", Owner::Ricky, &NoEvidence).unwrap());
        assert_eq!(resolver.state("Chiesa", Owner::Ricky).unwrap(), VisibilityState::Active);
    }

    #[test]
    fn test_hidden_ignores_evidence() {
        let conn = setup();
        let resolver = ProviderVisibilityResolver::new(&conn);
        resolver.hide("Chiesa", Owner::Ricky).unwrap();
        resolver.hide("CHIESA", Owner::Ricky).unwrap();

        let snapshot = resolver.snapshot().unwrap();
        assert_eq!(snapshot.len(), 1);
        let key = ProviderKey::new("chiésa");
        assert!(!snapshot.is_visible(&key, Owner::Ricky, &DataAt(Utc::now())));
        // other owner untouched
        assert!(snapshot.is_visible(&key, Owner::Ferreteria, &NoEvidence));
    }

    #[test]
    fn test_deleted_reactivates_only_on_fresh_evidence() {
        let conn = setup();
        let resolver = ProviderVisibilityResolver::new(&conn);
        let deleted_at = Utc::now() - Duration::days(2);
        resolver.delete_at("Bahco", Owner::Ferreteria, deleted_at).unwrap();

        let snapshot = resolver.snapshot().unwrap();
        let key = ProviderKey::new("bahco");
        assert!(!snapshot.is_visible(&key, Owner::Ferreteria, &NoEvidence));
        assert!(!snapshot.is_visible(&key, Owner::Ferreteria, &DataAt(deleted_at - Duration::days(1))));
        assert!(snapshot.is_visible(&key, Owner::Ferreteria, &DataAt(Utc::now())));

        // reads never clear the stored state
        assert_eq!(resolver.state("bahco", Owner::Ferreteria).unwrap(), VisibilityState::Deleted);
    }

    #[test]
    fn test_manual_store_as_evidence() {
        let conn = setup();
        let resolver = ProviderVisibilityResolver::new(&conn);
        let deleted_at = Utc::now() - Duration::hours(3);

        insert_manual_product(
            &conn,
            &NewManualProduct::new("Disco de corte", "Bahco", Owner::Ferreteria)
                .updated_at(deleted_at - Duration::hours(1)),
        )
        .unwrap();
        resolver.delete_at("Bahco", Owner::Ferreteria, deleted_at).unwrap();

        let store = ManualCatalogStore::new(&conn);
        assert!(!resolver.is_visible("bahco", Owner::Ferreteria, &store).unwrap());

        insert_manual_product(&conn, &NewManualProduct::new("Disco flap", "bahco", Owner::Ferreteria)).unwrap();
        assert!(resolver.is_visible("bahco", Owner::Ferreteria, &store).unwrap());
    }

    #[test]
    fn test_delete_cascades_to_orphan_provider() {
        let conn = setup();
        register_provider(&conn, "Stanley", Owner::Ricky).unwrap();
        register_provider(&conn, "Stanley", Owner::Ferreteria).unwrap();
        let resolver = ProviderVisibilityResolver::new(&conn);

        let first = resolver.delete("Stanley", Owner::Ricky).unwrap();
        assert!(first.association_removed);
        assert!(!first.provider_removed, "still associated with ferreteria");

        let second = resolver.delete("Stanley", Owner::Ferreteria).unwrap();
        assert!(second.provider_removed);

        // idempotent
        let again = resolver.delete("Stanley", Owner::Ferreteria).unwrap();
        assert_eq!(again, DeleteOutcome::default());
    }

    #[test]
    fn test_delete_keeps_provider_referenced_by_manual_rows() {
        let conn = setup();
        insert_manual_product(&conn, &NewManualProduct::new("Martillo", "Stanley", Owner::Ricky)).unwrap();

        let outcome = ProviderVisibilityResolver::new(&conn)
            .delete("Stanley", Owner::Ricky)
            .unwrap();
        assert!(outcome.association_removed);
        assert!(!outcome.provider_removed);
    }

    #[test]
    fn test_restore_reactivates_and_reassociates() {
        let conn = setup();
        register_provider(&conn, "Chiesa", Owner::Ricky).unwrap();
        let resolver = ProviderVisibilityResolver::new(&conn);

        resolver.delete("Chiesa", Owner::Ricky).unwrap();
        resolver.restore("chiesa", Owner::Ricky).unwrap();
        resolver.restore("chiesa", Owner::Ricky).unwrap();

        assert_eq!(resolver.state("Chiesa", Owner::Ricky).unwrap(), VisibilityState::Active);
        assert_eq!(association_count(&conn, &ProviderKey::new("chiesa")).unwrap(), 1);
    }

    #[test]
    fn test_hide_after_delete_clears_timestamp() {
        let conn = setup();
        let resolver = ProviderVisibilityResolver::new(&conn);
        resolver.delete("Chiesa", Owner::Ricky).unwrap();
        resolver.hide("Chiesa", Owner::Ricky).unwrap();

        let snapshot = resolver.snapshot().unwrap();
        let record = snapshot.record(&ProviderKey::new("chiesa"), Owner::Ricky).unwrap();
        assert_eq!(record.state, VisibilityState::Hidden);
        assert_eq!(record.deleted_at, None);
    }
}
