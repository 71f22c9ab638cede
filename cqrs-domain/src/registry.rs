//! 类型注册表（TypeRegistry）
//!
//! 以类型名为键、构造闭包为值的互斥保护映射，是命令、事件数据与聚合
//! 三类注册表的共同底座。注册错误属于编程错误，以 `Result` 返回，
//! 由组合根决定是否终止启动。
//!
use crate::error::{DomainError, DomainResult};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub struct TypeRegistry<F> {
    kind: &'static str,
    entries: Mutex<HashMap<String, F>>,
}

impl<F: Clone> TypeRegistry<F> {
    /// `kind` 仅用于错误信息，例如 "command"、"event"、"aggregate"
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn register(&self, type_name: &str, factory: F) -> DomainResult<()> {
        if type_name.is_empty() {
            return Err(DomainError::EmptyTypeName { kind: self.kind });
        }
        let mut entries = self.lock();
        if entries.contains_key(type_name) {
            return Err(DomainError::DuplicateType {
                kind: self.kind,
                type_name: type_name.to_string(),
            });
        }
        entries.insert(type_name.to_string(), factory);
        Ok(())
    }

    pub fn unregister(&self, type_name: &str) -> DomainResult<()> {
        if type_name.is_empty() {
            return Err(DomainError::EmptyTypeName { kind: self.kind });
        }
        match self.lock().remove(type_name) {
            Some(_) => Ok(()),
            None => Err(self.not_registered(type_name)),
        }
    }

    /// 取出构造闭包的副本，调用方在锁外执行构造
    pub fn get(&self, type_name: &str) -> DomainResult<F> {
        self.lock()
            .get(type_name)
            .cloned()
            .ok_or_else(|| self.not_registered(type_name))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.lock().contains_key(type_name)
    }

    /// 已注册类型名（排序后返回）
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.lock().keys().cloned().collect();
        types.sort();
        types
    }

    fn not_registered(&self, type_name: &str) -> DomainError {
        DomainError::NotRegistered {
            kind: self.kind,
            type_name: type_name.to_string(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, F>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
