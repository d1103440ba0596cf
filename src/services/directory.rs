//! Entity directory - read-only lookup of registered people by token
//!
//! The pipeline only reads the directory. Registration happens outside the
//! scan path through `insert`.

use crate::domain::types::Entity;
use parking_lot::RwLock;
use tracing::{debug, info};

/// Lookup capability handed to the attendance state machine
pub trait Directory: Send + Sync {
    /// Find the entity whose identifier equals the token
    fn lookup(&self, token: &str) -> Option<Entity>;

    /// Snapshot of all registered entities, in registration order
    fn entities(&self) -> Vec<Entity>;
}

/// Directory held in memory, seeded from configuration
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    entities: RwLock<Vec<Entity>>,
}

impl InMemoryDirectory {
    pub fn new(seed: Vec<Entity>) -> Self {
        let directory = Self::default();
        for entity in seed {
            directory.insert(entity);
        }
        info!(entities = %directory.len(), "directory_loaded");
        directory
    }

    /// Register an entity. Returns false if the identifier is taken.
    pub fn insert(&self, entity: Entity) -> bool {
        let mut entities = self.entities.write();
        if entities.iter().any(|e| e.id == entity.id) {
            debug!(id = %entity.id, "directory_duplicate_id");
            return false;
        }
        entities.push(entity);
        true
    }

    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }
}

impl Directory for InMemoryDirectory {
    fn lookup(&self, token: &str) -> Option<Entity> {
        self.entities.read().iter().find(|e| e.id.as_str() == token).cloned()
    }

    fn entities(&self) -> Vec<Entity> {
        self.entities.read().clone()
    }
}
