//! In-process scenario store applying the same write rules as PostgreSQL.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::scenario::{Scenario, ScenarioKey, ScenarioUpdate, UpdateKind};

use super::{OutboxEntry, OutboxRecord, ScenarioStore, StateCount, StoreError};

#[derive(Debug, Default)]
struct Tables {
    scenarios: BTreeMap<ScenarioKey, Scenario>,
    outbox: Vec<(OutboxRecord, bool)>,
    next_outbox_id: i64,
}

impl Tables {
    fn apply(&mut self, updates: &[ScenarioUpdate]) -> Vec<ScenarioKey> {
        let mut written = Vec::with_capacity(updates.len());

        for update in updates {
            let record = &update.record;
            let key = update.key();

            let applied = match update.kind {
                UpdateKind::Advance => match self.scenarios.get_mut(&key) {
                    Some(row) if row.state == update.from_state => {
                        row.state = record.state.clone();
                        row.artifacts
                            .extend(record.artifacts.iter().map(|(k, v)| (k.clone(), v.clone())));
                        true
                    }
                    _ => false,
                },
                UpdateKind::Branch => {
                    let root_ready = self
                        .scenarios
                        .get(&ScenarioKey::root(record.id))
                        .is_some_and(|root| root.state == record.state);
                    if root_ready && !self.scenarios.contains_key(&key) {
                        self.scenarios.insert(key.clone(), record.clone());
                        true
                    } else {
                        false
                    }
                }
            };

            if applied {
                written.push(key);
            }
        }

        written
    }
}

/// Scenario store held in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with scenarios.
    pub fn with_scenarios(scenarios: impl IntoIterator<Item = Scenario>) -> Self {
        let store = Self::new();
        for scenario in scenarios {
            store.insert(scenario);
        }
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Inserts or replaces a scenario row.
    pub fn insert(&self, scenario: Scenario) {
        self.lock().scenarios.insert(scenario.key(), scenario);
    }

    /// All rows ordered by key.
    pub fn snapshot(&self) -> Vec<Scenario> {
        self.lock().scenarios.values().cloned().collect()
    }

    /// Recorded state of a row.
    pub fn state_of(&self, key: &ScenarioKey) -> Option<String> {
        self.lock().scenarios.get(key).map(|s| s.state.clone())
    }

    /// Number of outbox rows already published.
    pub fn sent_outbox_count(&self) -> usize {
        self.lock().outbox.iter().filter(|(_, sent)| *sent).count()
    }
}

#[async_trait]
impl ScenarioStore for MemoryStore {
    async fn fetch_eligible(
        &self,
        state: &str,
        limit: usize,
    ) -> Result<Vec<Scenario>, StoreError> {
        Ok(self
            .lock()
            .scenarios
            .values()
            .filter(|s| s.state == state)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn bulk_update_state(
        &self,
        updates: &[ScenarioUpdate],
    ) -> Result<Vec<ScenarioKey>, StoreError> {
        Ok(self.lock().apply(updates))
    }

    async fn bulk_update_with_outbox(
        &self,
        updates: &[ScenarioUpdate],
        outgoing: &[OutboxEntry],
    ) -> Result<Vec<ScenarioKey>, StoreError> {
        let mut tables = self.lock();
        let written = tables.apply(updates);

        for entry in outgoing.iter().filter(|e| written.contains(&e.key)) {
            tables.next_outbox_id += 1;
            let record = OutboxRecord {
                id: tables.next_outbox_id,
                queue: entry.queue.clone(),
                body: entry.body.clone(),
            };
            tables.outbox.push((record, false));
        }

        Ok(written)
    }

    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxRecord>, StoreError> {
        Ok(self
            .lock()
            .outbox
            .iter()
            .filter(|(_, sent)| !sent)
            .take(limit)
            .map(|(record, _)| record.clone())
            .collect())
    }

    async fn mark_outbox_sent(&self, ids: &[i64]) -> Result<(), StoreError> {
        for (record, sent) in self.lock().outbox.iter_mut() {
            if ids.contains(&record.id) {
                *sent = true;
            }
        }
        Ok(())
    }

    async fn get(&self, key: &ScenarioKey) -> Result<Option<Scenario>, StoreError> {
        Ok(self.lock().scenarios.get(key).cloned())
    }

    async fn count_by_state(&self) -> Result<Vec<StateCount>, StoreError> {
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for scenario in self.lock().scenarios.values() {
            *counts.entry(scenario.state.clone()).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(state, count)| StateCount { state, count })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advanced(id: i64, to: &str, from: &str) -> ScenarioUpdate {
        ScenarioUpdate::advance(Scenario::new(id, to, "b/"), from)
    }

    #[tokio::test]
    async fn test_fetch_eligible_respects_state_and_limit() {
        let store = MemoryStore::with_scenarios(
            (1..=5).map(|id| Scenario::new(id, if id == 3 { "admitted" } else { "free" }, "b/")),
        );

        let free = store.fetch_eligible("free", 3).await.unwrap();
        assert_eq!(free.iter().map(|s| s.id).collect::<Vec<_>>(), vec![1, 2, 4]);
    }

    #[tokio::test]
    async fn test_advance_is_guarded_and_replay_safe() {
        let store = MemoryStore::with_scenarios([Scenario::new(1, "free", "b/")]);

        let written = store
            .bulk_update_state(&[advanced(1, "admitted", "free")])
            .await
            .unwrap();
        assert_eq!(written, vec![ScenarioKey::root(1)]);

        let replay = store
            .bulk_update_state(&[advanced(1, "admitted", "free")])
            .await
            .unwrap();
        assert!(replay.is_empty());
        assert_eq!(store.state_of(&ScenarioKey::root(1)).as_deref(), Some("admitted"));
    }

    #[tokio::test]
    async fn test_advance_merges_artifacts() {
        let store = MemoryStore::with_scenarios([
            Scenario::new(1, "admitted", "b/").with_artifact("baseEsdl", "b/base.esdl")
        ]);
        let next = Scenario::new(1, "esdlUpdated", "b/").with_artifact("updatedEsdl", "b/u.esdl");
        store
            .bulk_update_state(&[ScenarioUpdate::advance(next, "admitted")])
            .await
            .unwrap();

        let row = store.get(&ScenarioKey::root(1)).await.unwrap().unwrap();
        assert_eq!(row.artifacts.len(), 2);
        assert_eq!(row.artifacts["updatedEsdl"], "b/u.esdl");
    }

    #[tokio::test]
    async fn test_branch_requires_root_in_branch_state() {
        let store = MemoryStore::with_scenarios([Scenario::new(9, "essimExported", "b/")]);

        let mut child = Scenario::new(9, "investmentPlanned", "b/");
        child.network_id = Some("net-a".to_string());
        child.investment_path = Some("path_a".to_string());
        let branch = ScenarioUpdate::branch(child, "essimExported");

        // Root has not advanced yet
        let written = store.bulk_update_state(&[branch.clone()]).await.unwrap();
        assert!(written.is_empty());

        let written = store
            .bulk_update_state(&[advanced(9, "investmentPlanned", "essimExported"), branch.clone()])
            .await
            .unwrap();
        assert_eq!(
            written,
            vec![
                ScenarioKey::root(9),
                ScenarioKey::branch(9, "net-a", "path_a")
            ]
        );

        let written = store.bulk_update_state(&[branch]).await.unwrap();
        assert!(written.is_empty());
    }

    #[tokio::test]
    async fn test_branches_on_one_network_are_separate_rows() {
        let store = MemoryStore::with_scenarios([Scenario::new(9, "essimExported", "b/")]);

        let branch = |path: &str| {
            let mut child = Scenario::new(9, "investmentPlanned", "b/");
            child.network_id = Some("net-a".to_string());
            child.investment_path = Some(path.to_string());
            ScenarioUpdate::branch(child, "essimExported")
        };

        let written = store
            .bulk_update_state(&[
                advanced(9, "investmentPlanned", "essimExported"),
                branch("path_a"),
                branch("path_b"),
            ])
            .await
            .unwrap();
        assert_eq!(written.len(), 3);
        assert_eq!(store.snapshot().len(), 3);
    }

    #[tokio::test]
    async fn test_outbox_only_records_written_keys() {
        let store = MemoryStore::with_scenarios([
            Scenario::new(1, "free", "b/"),
            Scenario::new(2, "admitted", "b/"),
        ]);
        let outgoing = vec![
            OutboxEntry {
                key: ScenarioKey::root(1),
                queue: "esdl".into(),
                body: "one".into(),
            },
            OutboxEntry {
                key: ScenarioKey::root(2),
                queue: "esdl".into(),
                body: "two".into(),
            },
        ];
        store
            .bulk_update_with_outbox(
                &[advanced(1, "admitted", "free"), advanced(2, "admitted", "free")],
                &outgoing,
            )
            .await
            .unwrap();

        let pending = store.pending_outbox(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].body, "one");

        store.mark_outbox_sent(&[pending[0].id]).await.unwrap();
        assert!(store.pending_outbox(10).await.unwrap().is_empty());
        assert_eq!(store.sent_outbox_count(), 1);
    }

    #[tokio::test]
    async fn test_count_by_state() {
        let store = MemoryStore::with_scenarios([
            Scenario::new(1, "free", "b/"),
            Scenario::new(2, "free", "b/"),
            Scenario::new(3, "admitted", "b/"),
        ]);
        let counts = store.count_by_state().await.unwrap();
        assert_eq!(
            counts,
            vec![
                StateCount {
                    state: "admitted".into(),
                    count: 1
                },
                StateCount {
                    state: "free".into(),
                    count: 2
                },
            ]
        );
    }
}
