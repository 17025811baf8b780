//! 资源预留冲突判定
//!
//! 预留键是不透明字符串，`shared:`前缀表示共享持有。
//! 共享持有之间互不冲突，独占持有与同键的任何持有冲突。

/// 共享资源键前缀
pub const SHARED_PREFIX: &str = "shared:";

/// 一个任务的资源声明，按独占/共享拆分后的形式
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceClaims {
    exclusive: Vec<String>,
    shared: Vec<String>,
}

impl ResourceClaims {
    /// 解析任务的`reserved_resources`列表
    ///
    /// `shared:`前缀被剥掉，剩余部分作为共享键；其余键为独占键。
    pub fn parse<S: AsRef<str>>(resources: &[S]) -> Self {
        let mut exclusive = Vec::new();
        let mut shared = Vec::new();
        for resource in resources {
            let resource = resource.as_ref();
            match resource.strip_prefix(SHARED_PREFIX) {
                Some(key) => shared.push(key.to_string()),
                None => exclusive.push(resource.to_string()),
            }
        }
        Self { exclusive, shared }
    }

    pub fn is_empty(&self) -> bool {
        self.exclusive.is_empty() && self.shared.is_empty()
    }

    pub fn exclusive(&self) -> &[String] {
        &self.exclusive
    }

    pub fn shared(&self) -> &[String] {
        &self.shared
    }

    /// 判定本声明与已被占用的声明集合是否冲突
    ///
    /// 独占键与对方的独占或共享持有同键即冲突；
    /// 共享键只与对方的独占持有同键冲突。
    pub fn conflicts_with(&self, taken: &ResourceClaims) -> bool {
        if self
            .exclusive
            .iter()
            .any(|key| taken.exclusive.contains(key) || taken.shared.contains(key))
        {
            return true;
        }
        self.shared.iter().any(|key| taken.exclusive.contains(key))
    }

    /// 将另一组声明并入已占用集合，用于按序扫描时的累积
    pub fn extend(&mut self, other: &ResourceClaims) {
        self.exclusive.extend(other.exclusive.iter().cloned());
        self.shared.extend(other.shared.iter().cloned());
    }
}
