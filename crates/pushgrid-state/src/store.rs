//! StateStore: redb-backed persistence for deployments and release histories.
//!
//! All values are JSON-serialized into redb's `&[u8]` value columns. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENT_KEYS).map_err(map_err!(Table))?;
        txn.open_table(HISTORIES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Register a new deployment with an empty history.
    ///
    /// Fails with [`StateError::AlreadyExists`] if the id, name or key is
    /// already taken.
    pub fn create_deployment(&self, deployment: &Deployment) -> StateResult<()> {
        let value = serde_json::to_vec(deployment).map_err(map_err!(Serialize))?;
        let empty = serde_json::to_vec(&Vec::<Release>::new()).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut deployments = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            let mut keys = txn.open_table(DEPLOYMENT_KEYS).map_err(map_err!(Table))?;
            let mut histories = txn.open_table(HISTORIES).map_err(map_err!(Table))?;

            if deployments
                .get(deployment.id.as_str())
                .map_err(map_err!(Read))?
                .is_some()
            {
                return Err(StateError::AlreadyExists(format!(
                    "deployment id {}",
                    deployment.id
                )));
            }
            if keys
                .get(deployment.key.as_str())
                .map_err(map_err!(Read))?
                .is_some()
            {
                return Err(StateError::AlreadyExists("deployment key".to_string()));
            }
            for entry in deployments.iter().map_err(map_err!(Read))? {
                let (_, existing) = entry.map_err(map_err!(Read))?;
                let existing: Deployment =
                    serde_json::from_slice(existing.value()).map_err(map_err!(Deserialize))?;
                if existing.name == deployment.name {
                    return Err(StateError::AlreadyExists(format!(
                        "deployment {}",
                        deployment.name
                    )));
                }
            }

            deployments
                .insert(deployment.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            keys.insert(deployment.key.as_str(), deployment.id.as_str())
                .map_err(map_err!(Write))?;
            histories
                .insert(deployment.id.as_str(), empty.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = %deployment.id, name = %deployment.name, "deployment created");
        Ok(())
    }

    pub fn get_deployment(&self, id: &str) -> StateResult<Option<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let deployment: Deployment =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(deployment))
            }
            None => Ok(None),
        }
    }

    pub fn get_deployment_by_name(&self, name: &str) -> StateResult<Option<Deployment>> {
        Ok(self
            .list_deployments()?
            .into_iter()
            .find(|d| d.name == name))
    }

    /// List all deployments, ordered by id.
    pub fn list_deployments(&self) -> StateResult<Vec<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let deployment: Deployment =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(deployment);
        }
        Ok(results)
    }

    // ── Release histories ──────────────────────────────────────────

    /// Release history of a deployment, oldest first.
    pub fn get_history(&self, deployment_id: &str) -> StateResult<Option<Vec<Release>>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HISTORIES).map_err(map_err!(Table))?;
        match table.get(deployment_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let history: Vec<Release> =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(history))
            }
            None => Ok(None),
        }
    }

    /// Resolve a client-facing deployment key to its deployment and history
    /// from a single snapshot.
    pub fn get_history_by_key(
        &self,
        key: &str,
    ) -> StateResult<Option<(Deployment, Vec<Release>)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let keys = txn.open_table(DEPLOYMENT_KEYS).map_err(map_err!(Table))?;
        let Some(id) = keys.get(key).map_err(map_err!(Read))? else {
            return Ok(None);
        };
        let id = id.value().to_string();

        let deployments = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let histories = txn.open_table(HISTORIES).map_err(map_err!(Table))?;
        let deployment: Deployment = match deployments.get(id.as_str()).map_err(map_err!(Read))? {
            Some(guard) => serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
            None => return Err(StateError::NotFound(format!("deployment {id}"))),
        };
        let history: Vec<Release> = match histories.get(id.as_str()).map_err(map_err!(Read))? {
            Some(guard) => serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
            None => Vec::new(),
        };
        Ok(Some((deployment, history)))
    }

    /// Atomically read, modify and write a deployment's history.
    ///
    /// The history is only written back when `f` returns `Ok`. redb admits
    /// one write transaction at a time, so concurrent updates to the same
    /// history never interleave.
    pub fn update_history<T, E>(
        &self,
        deployment_id: &str,
        f: impl FnOnce(&mut Vec<Release>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StateError>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let result;
        {
            let mut table = txn.open_table(HISTORIES).map_err(map_err!(Table))?;
            let mut history: Vec<Release> = match table
                .get(deployment_id)
                .map_err(map_err!(Read))?
            {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => {
                    return Err(StateError::NotFound(format!("deployment {deployment_id}")).into());
                }
            };

            result = f(&mut history)?;

            let value = serde_json::to_vec(&history).map_err(map_err!(Serialize))?;
            table
                .insert(deployment_id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deployment = %deployment_id, "history updated");
        Ok(result)
    }
}
