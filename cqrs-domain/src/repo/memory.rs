//! 内存仓储：按命名空间隔离，`find_all` 保持首次插入顺序
//!
use super::{Entity, ReadRepo, WriteRepo};
use crate::context::Context;
use crate::error::{DomainError, DomainResult};
use crate::id::Id;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

struct Namespace<E> {
    order: Vec<Id>,
    items: HashMap<Id, E>,
}

impl<E> Default for Namespace<E> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            items: HashMap::new(),
        }
    }
}

pub struct MemoryRepo<E> {
    namespaces: Mutex<HashMap<String, Namespace<E>>>,
}

impl<E> Default for MemoryRepo<E> {
    fn default() -> Self {
        Self {
            namespaces: Mutex::new(HashMap::new()),
        }
    }
}

impl<E: Entity> MemoryRepo<E> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Namespace<E>>> {
        self.namespaces.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl<E: Entity> ReadRepo<E> for MemoryRepo<E> {
    async fn find(&self, ctx: &Context, id: &Id) -> DomainResult<E> {
        self.lock()
            .get(ctx.namespace())
            .and_then(|ns| ns.items.get(id))
            .cloned()
            .ok_or_else(|| DomainError::EntityNotFound { id: id.to_string() })
    }

    async fn find_all(&self, ctx: &Context) -> DomainResult<Vec<E>> {
        let namespaces = self.lock();
        let Some(ns) = namespaces.get(ctx.namespace()) else {
            return Ok(Vec::new());
        };
        Ok(ns
            .order
            .iter()
            .filter_map(|id| ns.items.get(id).cloned())
            .collect())
    }
}

#[async_trait]
impl<E: Entity> WriteRepo<E> for MemoryRepo<E> {
    async fn save(&self, ctx: &Context, entity: E) -> DomainResult<()> {
        let id = entity.entity_id().clone();
        if id.is_empty() {
            return Err(DomainError::MissingEntityId);
        }
        let mut namespaces = self.lock();
        let ns = namespaces.entry(ctx.namespace().to_string()).or_default();
        if ns.items.insert(id.clone(), entity).is_none() {
            ns.order.push(id);
        }
        Ok(())
    }

    async fn remove(&self, ctx: &Context, id: &Id) -> DomainResult<()> {
        let mut namespaces = self.lock();
        let removed = namespaces
            .get_mut(ctx.namespace())
            .and_then(|ns| {
                let entity = ns.items.remove(id)?;
                ns.order.retain(|other| other != id);
                Some(entity)
            });
        match removed {
            Some(_) => Ok(()),
            None => Err(DomainError::EntityNotFound { id: id.to_string() }),
        }
    }
}
