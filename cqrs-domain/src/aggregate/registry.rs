use super::{Aggregate, AggregateType};
use crate::error::DomainResult;
use crate::id::Id;
use crate::registry::TypeRegistry;
use std::sync::{Arc, OnceLock};

/// 聚合工厂：按标识创建零状态聚合
pub type AggregateFactory = Arc<dyn Fn(Id) -> Box<dyn Aggregate> + Send + Sync>;

/// 聚合注册表
pub struct AggregateRegistry {
    inner: TypeRegistry<AggregateFactory>,
}

impl Default for AggregateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregateRegistry {
    pub fn new() -> Self {
        Self {
            inner: TypeRegistry::new("aggregate"),
        }
    }

    /// 进程级默认注册表
    pub fn global() -> Arc<AggregateRegistry> {
        static GLOBAL: OnceLock<Arc<AggregateRegistry>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(AggregateRegistry::new()))
            .clone()
    }

    /// 注册聚合，类型名取自 `factory(Id::empty())` 的聚合类型
    pub fn register<F>(&self, factory: F) -> DomainResult<()>
    where
        F: Fn(Id) -> Box<dyn Aggregate> + Send + Sync + 'static,
    {
        let aggregate_type = factory(Id::empty()).aggregate_type().clone();
        self.inner.register(aggregate_type.as_str(), Arc::new(factory))
    }

    pub fn unregister(&self, aggregate_type: &AggregateType) -> DomainResult<()> {
        self.inner.unregister(aggregate_type.as_str())
    }

    pub fn create(&self, aggregate_type: &AggregateType, id: Id) -> DomainResult<Box<dyn Aggregate>> {
        let factory = self.inner.get(aggregate_type.as_str())?;
        Ok(factory(id))
    }

    pub fn contains(&self, aggregate_type: &AggregateType) -> bool {
        self.inner.contains(aggregate_type.as_str())
    }
}
