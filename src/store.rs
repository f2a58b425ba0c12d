//! Durable, versioned persistence of the partial tree.
//!
//! The [`TreeStore`] is the single source of truth for the scheduler:
//! nodes are keyed by identity in an embedded [`redb`] database with
//! bincode-encoded values, writes are conflict-checked idempotent
//! upserts, and each expansion phase commits as one atomic write
//! transaction together with the phase counter. A process restart
//! resumes from whatever the last committed phase left behind.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};

use crate::tree::{Node, NodeId, Tree};

const NODES: TableDefinition<&[u8], Vec<u8>> = TableDefinition::new("nodes");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const PHASE_KEY: &str = "phase";

/// Tree store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("node not found: {id}")]
    NotFound { id: NodeId },

    /// Two different terminal outcomes were written for the same node
    /// identity. This indicates evaluator non-determinism or a
    /// scheduling bug and is fatal for the run.
    #[error("conflicting write for node {id}: stored {stored}, incoming {incoming}")]
    ConflictingWrite {
        id: NodeId,
        stored: String,
        incoming: String,
    },

    /// A split node was written before both of its children.
    #[error("split node {parent} written before child {child}")]
    DanglingChild { parent: NodeId, child: NodeId },

    #[error("serialization error: {0}")]
    Codec(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

fn backend<E: std::fmt::Display>(err: E) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn encode(node: &Node) -> Result<Vec<u8>, StoreError> {
    bincode::serialize(node).map_err(|e| StoreError::Codec(e.to_string()))
}

fn decode(bytes: &[u8]) -> Result<Node, StoreError> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Codec(e.to_string()))
}

type NodeTable<'txn> = redb::Table<'txn, &'static [u8], Vec<u8>>;

/// Apply one conflict-checked idempotent upsert inside an open write
/// table. Rules:
/// - absent: write;
/// - identical state: no-op;
/// - stored `Unknown`: overwrite (forward progress);
/// - stored terminal, incoming `Unknown`: no-op (a replayed phase must
///   not roll back the more expanded truth);
/// - stored terminal, incoming different outcome: `ConflictingWrite`.
///
/// A split node additionally requires both children to be present
/// already, so callers must write deepest-first.
fn apply_node(table: &mut NodeTable<'_>, node: &Node) -> Result<(), StoreError> {
    let key = node.id().to_key();

    let stored = {
        let guard = table.get(key.as_slice()).map_err(backend)?;
        match guard {
            Some(value) => Some(decode(&value.value())?),
            None => None,
        }
    };

    match stored {
        Some(ref old) if old == node => return Ok(()),
        Some(ref old) if old.is_terminal() => {
            if node.is_unknown() {
                return Ok(());
            }
            return Err(StoreError::ConflictingWrite {
                id: node.id(),
                stored: format!("{:?}", old.state()),
                incoming: format!("{:?}", node.state()),
            });
        }
        _ => {}
    }

    if let Some((left, right)) = node.children() {
        for child in [left, right] {
            let present = table
                .get(child.to_key().as_slice())
                .map_err(backend)?
                .is_some();
            if !present {
                return Err(StoreError::DanglingChild {
                    parent: node.id(),
                    child,
                });
            }
        }
    }

    table
        .insert(key.as_slice(), encode(node)?)
        .map_err(backend)?;
    Ok(())
}

/// Durable key-value persistence of tree nodes.
pub struct TreeStore {
    db: Database,
}

impl TreeStore {
    /// Open (or create) a store backed by a file.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(backend)?;
        let store = Self { db };
        store.create_tables()?;
        Ok(store)
    }

    /// Open a store backed by process memory. Used by tests and runs
    /// that do not need durability.
    pub fn in_memory() -> Result<Self, StoreError> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(backend)?;
        let store = Self { db };
        store.create_tables()?;
        Ok(store)
    }

    // Tables are created eagerly so readers never race table creation.
    fn create_tables(&self) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(backend)?;
        txn.open_table(NODES).map_err(backend)?;
        txn.open_table(META).map_err(backend)?;
        txn.commit().map_err(backend)?;
        Ok(())
    }

    /// Fetch a node, failing with `NotFound` if absent.
    pub fn get(&self, id: NodeId) -> Result<Node, StoreError> {
        self.try_get(id)?.ok_or(StoreError::NotFound { id })
    }

    /// Fetch a node if present.
    pub fn try_get(&self, id: NodeId) -> Result<Option<Node>, StoreError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(NODES).map_err(backend)?;
        let guard = table.get(id.to_key().as_slice()).map_err(backend)?;
        match guard {
            Some(value) => Ok(Some(decode(&value.value())?)),
            None => Ok(None),
        }
    }

    /// Idempotent conflict-checked upsert of a single node.
    pub fn put(&self, node: &Node) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(backend)?;
        {
            let mut table = txn.open_table(NODES).map_err(backend)?;
            apply_node(&mut table, node)?;
        }
        txn.commit().map_err(backend)?;
        Ok(())
    }

    /// Commit one phase's node batch and the phase counter atomically.
    ///
    /// Nodes are applied deepest-first so a split parent never lands
    /// before its children, at this commit point or any other.
    pub fn commit_phase(&self, phase: u64, nodes: &[Node]) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(backend)?;
        {
            let mut table = txn.open_table(NODES).map_err(backend)?;
            let mut order: Vec<&Node> = nodes.iter().collect();
            order.sort_by(|a, b| b.id().depth().cmp(&a.id().depth()));
            for node in order {
                apply_node(&mut table, node)?;
            }
            let mut meta = txn.open_table(META).map_err(backend)?;
            meta.insert(PHASE_KEY, phase).map_err(backend)?;
        }
        txn.commit().map_err(backend)?;
        tracing::debug!(phase, nodes = nodes.len(), "phase committed");
        Ok(())
    }

    /// The last durably committed phase, if any phase has committed.
    pub fn phase(&self) -> Result<Option<u64>, StoreError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(META).map_err(backend)?;
        let guard = table.get(PHASE_KEY).map_err(backend)?;
        Ok(guard.map(|v| v.value()))
    }

    /// Read the full persisted structure in one read transaction.
    pub fn snapshot(&self) -> Result<Tree, StoreError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(NODES).map_err(backend)?;
        let mut nodes = Vec::new();
        for entry in table.iter().map_err(backend)? {
            let (_key, value) = entry.map_err(backend)?;
            nodes.push(decode(&value.value())?);
        }
        Ok(Tree::from_nodes(nodes))
    }
}
