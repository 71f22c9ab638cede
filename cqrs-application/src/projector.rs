//! 投影处理器
//!
//! 把事件投影到读模型：查找实体（不存在时新建）→ 投影 → 保存，投影结果为 `None` 时删除实体。
//! 记录聚合版本的实体要求事件恰好是下一个版本，`IncorrectEntityVersion` 通常意味着需要
//! 在处理器前加装定序中间件或重建读模型。
//!
use async_trait::async_trait;
use cqrs_domain::event::Event;
use cqrs_domain::eventing::{EventHandler, EventHandlerType};
use cqrs_domain::repo::{Entity, WriteRepo};
use cqrs_domain::{Context, DomainError, DomainResult, Id};
use std::sync::Arc;
use tracing::debug;

#[async_trait]
pub trait Projector<E: Entity>: Send + Sync {
    fn projector_type(&self) -> EventHandlerType;

    /// 返回投影后的实体；返回 `None` 表示删除
    async fn project(&self, ctx: &Context, event: &Event, entity: E) -> DomainResult<Option<E>>;
}

type EntityFactory<E> = Arc<dyn Fn(&Id) -> E + Send + Sync>;

pub struct ProjectorEventHandler<E: Entity> {
    projector: Arc<dyn Projector<E>>,
    repo: Arc<dyn WriteRepo<E>>,
    new_entity: EntityFactory<E>,
}

impl<E: Entity> ProjectorEventHandler<E> {
    /// `new_entity` 以事件的聚合标识创建空实体
    pub fn new<F>(projector: Arc<dyn Projector<E>>, repo: Arc<dyn WriteRepo<E>>, new_entity: F) -> Self
    where
        F: Fn(&Id) -> E + Send + Sync + 'static,
    {
        Self {
            projector,
            repo,
            new_entity: Arc::new(new_entity),
        }
    }

    async fn find_or_create(&self, ctx: &Context, id: &Id) -> DomainResult<E> {
        match self.repo.find(ctx, id).await {
            Ok(entity) => Ok(entity),
            Err(DomainError::EntityNotFound { .. }) => Ok((self.new_entity)(id)),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl<E: Entity> EventHandler for ProjectorEventHandler<E> {
    fn handler_type(&self) -> EventHandlerType {
        self.projector.projector_type()
    }

    async fn handle_event(&self, ctx: &Context, event: &Event) -> DomainResult<()> {
        let id = event.aggregate_id();
        let entity = self.find_or_create(ctx, id).await?;

        if let Some(v) = entity.as_versionable() {
            let expected = v.aggregate_version() + 1;
            if event.version() != expected {
                return Err(DomainError::IncorrectEntityVersion {
                    id: id.to_string(),
                    expected,
                    found: event.version(),
                });
            }
        }

        match self.projector.project(ctx, event, entity).await? {
            Some(entity) => {
                if let Some(v) = entity.as_versionable() {
                    if v.aggregate_version() != event.version() {
                        return Err(DomainError::IncorrectEntityVersion {
                            id: id.to_string(),
                            expected: event.version(),
                            found: v.aggregate_version(),
                        });
                    }
                }
                self.repo.save(ctx, entity).await
            }
            None => {
                debug!(entity_id = %id, event_type = %event.event_type(), "projection removed entity");
                match self.repo.remove(ctx, id).await {
                    // 从未保存过的新实体无需删除
                    Err(DomainError::EntityNotFound { .. }) => Ok(()),
                    other => other,
                }
            }
        }
    }
}
