//! 任务处理器注册表
//!
//! 处理器按任务名注册，派发的任务以`Task.name`查找处理器。
//! 未注册的任务名在执行时报`HandlerNotFound`并落为失败。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use taskfleet_core::{TaskFleetError, TaskFleetResult};
use taskfleet_domain::context::TaskContext;

/// 任务处理器接口
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// 处理器负责的任务名
    fn name(&self) -> &str;

    /// 执行任务，返回Err即任务失败
    async fn run(&self, ctx: &TaskContext) -> TaskFleetResult<()>;
}

/// 任务处理器注册表
#[derive(Default)]
pub struct TaskRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器，同名覆盖
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        let name = handler.name().to_string();
        info!("注册任务处理器: {}", name);
        self.handlers.insert(name, handler);
    }

    pub fn get(&self, name: &str) -> TaskFleetResult<Arc<dyn TaskHandler>> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| TaskFleetError::HandlerNotFound {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}
