//! 任务管理器

use crate::entity::Task;
use crate::gc::GcRunner;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// 任务注册表
#[derive(Debug, Default)]
pub struct TaskManager {
    /// 任务表：任务 ID -> 任务
    tasks: DashMap<String, Arc<Task>>,
}

impl TaskManager {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 按 ID 查找任务
    pub fn load(&self, key: &str) -> Option<Arc<Task>> {
        self.tasks.get(key).map(|task| task.value().clone())
    }

    /// 写入任务
    pub fn store(&self, task: Arc<Task>) {
        self.tasks.insert(task.id.clone(), task);
    }

    /// 已存在则返回既有任务，否则写入并返回入参
    ///
    /// N 个并发调用拿到同一个实例，恰好一个看到 loaded == false
    pub fn load_or_store(&self, task: Arc<Task>) -> (Arc<Task>, bool) {
        match self.tasks.entry(task.id.clone()) {
            Entry::Occupied(entry) => (entry.get().clone(), true),
            Entry::Vacant(entry) => {
                entry.insert(task.clone());
                (task, false)
            }
        }
    }

    /// 删除任务
    pub fn delete(&self, key: &str) {
        self.tasks.remove(key);
    }

    /// 任务数量，O(n)，不要放在热路径
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// 注册表是否为空
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl GcRunner for TaskManager {
    fn name(&self) -> &'static str {
        "task"
    }

    /// 清理一轮过期任务
    ///
    /// 只回收终态且空闲超过 expire 的任务，
    /// 非终态任务可能还有下载在途，留给下一轮
    fn run_gc(&self, expire: Duration, now_nanos: i64) {
        let expire = expire.as_nanos() as i64;
        let mut expired = Vec::new();
        for entry in self.tasks.iter() {
            let task = entry.value();
            if task.state().is_terminal()
                && task.update_at.load(Ordering::SeqCst).saturating_add(expire) < now_nanos
            {
                expired.push(task.id.clone());
            }
        }

        for id in expired {
            info!(task_id = %id, "任务已过期，从注册表移除");
            self.delete(&id);
        }
    }
}
