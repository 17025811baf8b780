//! 任务执行上下文
//!
//! 执行期信息通过显式上下文对象沿处理器调用链传递，
//! 不依赖进程级全局状态，测试时可直接构造注入。

use crate::entities::{Task, TaskGroup};

#[derive(Debug, Clone)]
pub struct TaskContext {
    task: Task,
    task_group: Option<TaskGroup>,
}

impl TaskContext {
    pub fn new(task: Task, task_group: Option<TaskGroup>) -> Self {
        Self { task, task_group }
    }

    /// 当前正在执行的任务
    pub fn task(&self) -> &Task {
        &self.task
    }

    /// 当前任务所属的任务组
    pub fn task_group(&self) -> Option<&TaskGroup> {
        self.task_group.as_ref()
    }

    pub fn logging_cid(&self) -> &str {
        &self.task.logging_cid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::TaskGroup;

    #[test]
    fn test_context_exposes_task_and_group() {
        let task = Task::new("fleet.sync".to_string(), "cid-7".to_string());
        let group = TaskGroup::new("批量同步".to_string());
        let ctx = TaskContext::new(task.clone(), Some(group.clone()));

        assert_eq!(ctx.task().id, task.id);
        assert_eq!(ctx.task_group().unwrap().id, group.id);
        assert_eq!(ctx.logging_cid(), "cid-7");
    }

    #[test]
    fn test_context_without_group() {
        let task = Task::new("fleet.sync".to_string(), "cid-8".to_string());
        let ctx = TaskContext::new(task, None);
        assert!(ctx.task_group().is_none());
    }
}
