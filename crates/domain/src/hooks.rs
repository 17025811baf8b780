//! 任务生命周期回调
//!
//! 创建/删除路径上的附加动作以显式注册的回调表达，
//! 派发时运行on-create钩子，删除时运行on-delete钩子。

use std::sync::Arc;

use tracing::debug;

use crate::entities::Task;
use taskfleet_core::TaskFleetResult;

pub type TaskHook = Arc<dyn Fn(&Task) -> TaskFleetResult<()> + Send + Sync>;

struct NamedHook {
    name: String,
    hook: TaskHook,
}

/// 生命周期钩子注册表
#[derive(Default)]
pub struct LifecycleHooks {
    on_create: Vec<NamedHook>,
    on_delete: Vec<NamedHook>,
}

impl LifecycleHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_create<F>(&mut self, name: impl Into<String>, hook: F)
    where
        F: Fn(&Task) -> TaskFleetResult<()> + Send + Sync + 'static,
    {
        self.on_create.push(NamedHook {
            name: name.into(),
            hook: Arc::new(hook),
        });
    }

    pub fn on_delete<F>(&mut self, name: impl Into<String>, hook: F)
    where
        F: Fn(&Task) -> TaskFleetResult<()> + Send + Sync + 'static,
    {
        self.on_delete.push(NamedHook {
            name: name.into(),
            hook: Arc::new(hook),
        });
    }

    /// 按注册顺序运行on-create钩子，遇错即停并向上传播
    pub fn run_create(&self, task: &Task) -> TaskFleetResult<()> {
        for entry in &self.on_create {
            debug!("运行任务创建钩子: {} (任务: {})", entry.name, task.id);
            (entry.hook)(task)?;
        }
        Ok(())
    }

    /// 按注册顺序运行on-delete钩子，遇错即停并向上传播
    pub fn run_delete(&self, task: &Task) -> TaskFleetResult<()> {
        for entry in &self.on_delete {
            debug!("运行任务删除钩子: {} (任务: {})", entry.name, task.id);
            (entry.hook)(task)?;
        }
        Ok(())
    }
}
