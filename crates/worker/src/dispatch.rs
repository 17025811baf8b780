//! 任务派发入口
//!
//! 构造任务、运行创建钩子、落库后唤醒Worker。
//! 取消与删除也从这里走，保证钩子和通知不被绕过。

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use taskfleet_core::{TaskFleetError, TaskFleetResult};
use taskfleet_domain::entities::{CreatedResource, Task, TaskGroup};
use taskfleet_domain::hooks::LifecycleHooks;
use taskfleet_domain::messaging::TaskEventNotifier;
use taskfleet_domain::repositories::{
    CreatedResourceRepository, TaskGroupRepository, TaskRepository,
};

/// 派发请求
///
/// `logging_cid`缺省生成新值，跨任务传递请求链时由调用方显式设置。
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub name: String,
    pub logging_cid: String,
    pub args: Option<serde_json::Value>,
    pub kwargs: Option<serde_json::Value>,
    pub reserved_resources: Vec<String>,
    pub parent_task_id: Option<Uuid>,
    pub task_group_id: Option<Uuid>,
}

impl DispatchRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            logging_cid: Uuid::new_v4().to_string(),
            args: None,
            kwargs: None,
            reserved_resources: Vec::new(),
            parent_task_id: None,
            task_group_id: None,
        }
    }

    pub fn args(mut self, args: serde_json::Value) -> Self {
        self.args = Some(args);
        self
    }

    pub fn kwargs(mut self, kwargs: serde_json::Value) -> Self {
        self.kwargs = Some(kwargs);
        self
    }

    /// 设置资源预留键，`shared:`前缀表示共享持有
    pub fn resources<S: Into<String>>(mut self, resources: impl IntoIterator<Item = S>) -> Self {
        self.reserved_resources = resources.into_iter().map(Into::into).collect();
        self
    }

    pub fn parent(mut self, parent_task_id: Uuid) -> Self {
        self.parent_task_id = Some(parent_task_id);
        self
    }

    pub fn group(mut self, task_group_id: Uuid) -> Self {
        self.task_group_id = Some(task_group_id);
        self
    }

    pub fn logging_cid(mut self, cid: impl Into<String>) -> Self {
        self.logging_cid = cid.into();
        self
    }

    fn into_task(self) -> TaskFleetResult<Task> {
        if self.name.trim().is_empty() {
            return Err(TaskFleetError::InvalidTaskParams(
                "任务名不能为空".to_string(),
            ));
        }

        let mut task = Task::new(self.name, self.logging_cid);
        task.args = self.args;
        task.kwargs = self.kwargs;
        task.reserved_resources = self.reserved_resources;
        task.parent_task_id = self.parent_task_id;
        task.task_group_id = self.task_group_id;
        Ok(task)
    }
}

/// 任务派发器
#[derive(Clone)]
pub struct TaskDispatcher {
    task_repo: Arc<dyn TaskRepository>,
    group_repo: Arc<dyn TaskGroupRepository>,
    resource_repo: Arc<dyn CreatedResourceRepository>,
    hooks: Arc<LifecycleHooks>,
    notifier: Arc<dyn TaskEventNotifier>,
}

impl TaskDispatcher {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        group_repo: Arc<dyn TaskGroupRepository>,
        resource_repo: Arc<dyn CreatedResourceRepository>,
        hooks: Arc<LifecycleHooks>,
        notifier: Arc<dyn TaskEventNotifier>,
    ) -> Self {
        Self {
            task_repo,
            group_repo,
            resource_repo,
            hooks,
            notifier,
        }
    }

    /// 派发任务：运行创建钩子、落库并唤醒Worker
    pub async fn dispatch(&self, request: DispatchRequest) -> TaskFleetResult<Task> {
        let task = request.into_task()?;
        self.hooks.run_create(&task)?;

        let task = self.task_repo.create(&task).await?;
        self.notifier.wakeup().await?;

        info!("派发任务: {}", task.entity_description());
        Ok(task)
    }

    /// 请求取消任务
    ///
    /// waiting任务直接进入canceled终态；running任务转换后再广播
    /// 取消通知，由持有它的Worker中止执行。已是终态则忽略。
    pub async fn cancel(&self, task_id: Uuid) -> TaskFleetResult<bool> {
        let canceled = self.task_repo.set_canceled(task_id).await?;
        if canceled {
            self.notifier.cancel(task_id).await?;
            info!("取消任务: {}", task_id);
        } else {
            debug!("任务已处于终态，忽略取消请求: {}", task_id);
        }
        Ok(canceled)
    }

    /// 删除任务，先运行删除钩子
    pub async fn delete(&self, task_id: Uuid) -> TaskFleetResult<bool> {
        let Some(task) = self.task_repo.find_by_id(task_id).await? else {
            return Ok(false);
        };
        self.hooks.run_delete(&task)?;
        self.task_repo.delete(task_id).await
    }

    pub async fn create_group(&self, description: impl Into<String>) -> TaskFleetResult<TaskGroup> {
        let group = TaskGroup::new(description.into());
        self.group_repo.create(&group).await
    }

    /// 标记任务组的全部任务都已派发
    pub async fn finish_group(&self, group_id: Uuid) -> TaskFleetResult<TaskGroup> {
        self.group_repo.finish(group_id).await
    }

    /// 记录任务执行过程中创建的资源
    pub async fn record_created_resource(
        &self,
        task_id: Uuid,
        resource_type: impl Into<String>,
        resource_ref: impl Into<String>,
    ) -> TaskFleetResult<CreatedResource> {
        let resource = CreatedResource::new(task_id, resource_type.into(), resource_ref.into());
        self.resource_repo.create(&resource).await
    }

    pub async fn created_resources(&self, task_id: Uuid) -> TaskFleetResult<Vec<CreatedResource>> {
        self.resource_repo.find_by_task(task_id).await
    }
}
