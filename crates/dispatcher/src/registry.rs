use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use botfleet_worker::WorkerHost;

/// Worker宿主所在位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleKind {
    /// Worker实例运行在控制进程内
    Local,
    /// 通过代理访问独立运行单元
    Remote,
}

/// 注册表中的Worker句柄：运行单元引用加上可提交事件的宿主
#[derive(Debug)]
pub struct WorkerHandle {
    pub identity: String,
    pub unit_name: String,
    pub port: u16,
    pub kind: HandleKind,
    host: Arc<WorkerHost>,
}

impl WorkerHandle {
    pub fn new(
        identity: impl Into<String>,
        unit_name: impl Into<String>,
        port: u16,
        kind: HandleKind,
        host: Arc<WorkerHost>,
    ) -> Self {
        Self {
            identity: identity.into(),
            unit_name: unit_name.into(),
            port,
            kind,
            host,
        }
    }

    pub fn host(&self) -> &Arc<WorkerHost> {
        &self.host
    }
}

/// 运行中Worker的句柄表
///
/// 所有操作都在内部加锁。`add` 覆盖已存在的句柄，调用方负责先停止旧句柄。
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    handles: RwLock<HashMap<String, Arc<WorkerHandle>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回被替换的旧句柄
    pub fn add(&self, handle: WorkerHandle) -> Option<Arc<WorkerHandle>> {
        self.handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle.identity.clone(), Arc::new(handle))
    }

    pub fn remove(&self, identity: &str) -> Option<Arc<WorkerHandle>> {
        self.handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identity)
    }

    pub fn get(&self, identity: &str) -> Option<Arc<WorkerHandle>> {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(identity)
    }

    pub fn list(&self) -> Vec<Arc<WorkerHandle>> {
        let mut handles: Vec<_> = self
            .handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        handles.sort_by(|a, b| a.unit_name.cmp(&b.unit_name));
        handles
    }

    pub fn len(&self) -> usize {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 取出全部句柄（关闭时使用）
    pub fn drain(&self) -> Vec<Arc<WorkerHandle>> {
        self.handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, handle)| handle)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botfleet_core::models::WorkerType;

    fn handle(identity: &str, port: u16) -> WorkerHandle {
        let host = WorkerHost::spawn(format!("bot_{identity}"), || {
            botfleet_worker::instantiate(WorkerType::Echo)
        })
        .unwrap();
        WorkerHandle::new(identity, format!("bot_{identity}"), port, HandleKind::Local, host)
    }

    #[test]
    fn test_add_get_remove() {
        let registry = WorkerRegistry::new();
        assert!(registry.add(handle("a", 8443)).is_none());
        assert!(registry.add(handle("b", 8444)).is_none());
        assert_eq!(registry.len(), 2);

        let replaced = registry.add(handle("a", 8445)).unwrap();
        assert_eq!(replaced.port, 8443);
        assert_eq!(registry.get("a").unwrap().port, 8445);

        let removed = registry.remove("a").unwrap();
        assert_eq!(removed.identity, "a");
        assert!(registry.get("a").is_none());
        assert!(registry.remove("a").is_none());
        assert!(registry.contains("b"));
    }

    #[test]
    fn test_list_and_drain() {
        let registry = WorkerRegistry::new();
        registry.add(handle("b", 8444));
        registry.add(handle("a", 8443));

        let names: Vec<_> = registry.list().iter().map(|h| h.unit_name.clone()).collect();
        assert_eq!(names, vec!["bot_a", "bot_b"]);

        assert_eq!(registry.drain().len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_access() {
        let registry = Arc::new(WorkerRegistry::new());
        let threads: Vec<_> = (0..8u16)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    registry.add(handle(&format!("w{i}"), 8443 + i));
                    registry.get(&format!("w{i}")).is_some()
                })
            })
            .collect();
        for thread in threads {
            assert!(thread.join().unwrap());
        }
        assert_eq!(registry.len(), 8);
    }
}
