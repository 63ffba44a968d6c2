//! 镜像相关领域模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// docker 为无标签镜像输出的仓库名 / 标签占位符
pub const NONE_MARKER: &str = "<none>";

/// 单个镜像
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    pub id: String,
    pub repository: String,
    pub tag: String,
    pub created_at: DateTime<Utc>,
}

impl ImageDescriptor {
    pub fn new(
        id: impl Into<String>,
        repository: impl Into<String>,
        tag: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            repository: repository.into(),
            tag: tag.into(),
            created_at,
        }
    }

    /// `repository:tag`
    pub fn reference(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }

    /// 无标签镜像
    pub fn is_dangling(&self) -> bool {
        self.repository == NONE_MARKER || self.tag == NONE_MARKER
    }
}

/// 镜像族：共享同一仓库名（可按 tag / label 过滤）的一组镜像
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFamily {
    pub repository: String,
    pub tag_filter: Option<String>,
    /// `key=value` 形式的 label 过滤
    pub label_filter: Option<String>,
    /// 保留的镜像数量
    pub keep: usize,
}

impl ImageFamily {
    pub fn new(repository: impl Into<String>, keep: usize) -> Self {
        Self {
            repository: repository.into(),
            tag_filter: None,
            label_filter: None,
            keep,
        }
    }

    pub fn with_tag_filter(mut self, tag: impl Into<String>) -> Self {
        self.tag_filter = Some(tag.into());
        self
    }

    pub fn with_label_filter(mut self, label: impl Into<String>) -> Self {
        self.label_filter = Some(label.into());
        self
    }

    /// Value for docker's `reference=` filter.
    pub fn reference_filter(&self) -> String {
        match &self.tag_filter {
            Some(tag) => format!("{}:{}", self.repository, tag),
            None => self.repository.clone(),
        }
    }
}
