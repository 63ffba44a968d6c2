//! 镜像保留
//!
//! 保留镜像族中最新的 `keep` 个镜像，逐个移除其余镜像，最后清理悬空镜像

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

use crate::domain::{ImageDescriptor, ImageFamily};
use crate::infra::gateway::{ContainerRuntime, GatewayError};

/// 待移除的镜像及其在镜像族中的全部标签
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObsoleteImage {
    pub image: ImageDescriptor,
    /// 指向该镜像的 `repository:tag`，已排序；悬空镜像为空
    pub references: Vec<String>,
}

impl ObsoleteImage {
    /// 依次执行 `rmi` 的目标
    ///
    /// 带多个标签的镜像不能按 ID 删除（docker 要求 force），因此逐个移除标签，
    /// 最后一个标签移除时镜像随之删除。悬空镜像只能按 ID 删除。
    pub fn removal_targets(&self) -> Vec<String> {
        if self.references.is_empty() {
            vec![self.image.id.clone()]
        } else {
            self.references.clone()
        }
    }
}

/// 保留与移除的划分
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPlan {
    /// 从新到旧
    pub keep: Vec<ImageDescriptor>,
    /// 从新到旧
    pub obsolete: Vec<ObsoleteImage>,
}

/// 按创建时间从新到旧排序，保留前 `keep` 个
///
/// 同一镜像 ID 的多行（多个标签）只计一次。
pub fn plan(mut images: Vec<ImageDescriptor>, keep: usize) -> RetentionPlan {
    let mut references: HashMap<String, Vec<String>> = HashMap::new();
    for image in images.iter().filter(|img| !img.is_dangling()) {
        let refs = references.entry(image.id.clone()).or_default();
        let reference = image.reference();
        if !refs.contains(&reference) {
            refs.push(reference);
        }
    }

    images.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut seen = HashSet::new();
    images.retain(|image| seen.insert(image.id.clone()));

    let obsolete = if images.len() > keep {
        images.split_off(keep)
    } else {
        Vec::new()
    };

    let obsolete = obsolete
        .into_iter()
        .map(|image| {
            let mut refs = references.remove(&image.id).unwrap_or_default();
            refs.sort();
            ObsoleteImage {
                image,
                references: refs,
            }
        })
        .collect();

    RetentionPlan {
        keep: images,
        obsolete,
    }
}

/// 未能移除的镜像
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RemovalFailure {
    pub id: String,
    pub reference: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetentionReport {
    pub family: String,
    pub dry_run: bool,
    /// 保留的镜像 ID，从新到旧
    pub kept: Vec<String>,
    /// 已移除（dry run 时为将要移除）的镜像 ID
    pub removed: Vec<String>,
    pub failures: Vec<RemovalFailure>,
    pub dangling_removed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dangling_error: Option<String>,
}

impl RetentionReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.dangling_error.is_none()
    }

    pub fn summary(&self) -> String {
        let mut summary = format!(
            "kept {}, removed {}, dangling {}",
            self.kept.len(),
            self.removed.len(),
            self.dangling_removed
        );
        if !self.failures.is_empty() {
            summary.push_str(&format!(", {} failed", self.failures.len()));
        }
        if self.dry_run {
            summary.push_str(" (dry run)");
        }
        summary
    }
}

/// 通过容器运行时移除镜像族中的过期镜像
pub struct RetentionCollector<'a> {
    runtime: &'a dyn ContainerRuntime,
}

impl<'a> RetentionCollector<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime) -> Self {
        Self { runtime }
    }

    /// 移除过期镜像并清理悬空镜像
    ///
    /// 只有列出镜像失败才返回错误，单个镜像的失败记录在报告中
    pub async fn collect(&self, family: &ImageFamily) -> Result<RetentionReport, GatewayError> {
        self.run(family, false).await
    }

    /// 只报告 [`collect`](Self::collect) 会移除哪些镜像，不做任何修改
    pub async fn preview(&self, family: &ImageFamily) -> Result<RetentionReport, GatewayError> {
        self.run(family, true).await
    }

    async fn run(&self, family: &ImageFamily, dry_run: bool) -> Result<RetentionReport, GatewayError> {
        let images = self.runtime.list_images(family).await?;
        let listed = images.len();
        let plan = plan(images, family.keep);

        info!(
            family = %family.reference_filter(),
            listed,
            keep = family.keep,
            obsolete = plan.obsolete.len(),
            dry_run,
            "Image retention plan"
        );

        let mut report = RetentionReport {
            family: family.reference_filter(),
            dry_run,
            kept: plan.keep.iter().map(|img| img.id.clone()).collect(),
            ..RetentionReport::default()
        };

        for obsolete in &plan.obsolete {
            let image = &obsolete.image;
            let targets = obsolete.removal_targets();

            if dry_run {
                info!(id = %image.id, targets = %targets.join(", "), "Would remove image");
                report.removed.push(image.id.clone());
                continue;
            }

            let mut failure = None;
            for target in &targets {
                if let Err(e) = self.runtime.remove_image(target).await {
                    failure = Some((target.clone(), e));
                    break;
                }
            }

            match failure {
                None => {
                    info!(id = %image.id, targets = %targets.join(", "), "Removed obsolete image");
                    report.removed.push(image.id.clone());
                }
                Some((target, e)) => {
                    warn!(id = %image.id, target = %target, error = %e, "Failed to remove image");
                    report.failures.push(RemovalFailure {
                        id: image.id.clone(),
                        reference: target,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !dry_run {
            match self.runtime.prune_dangling_images().await {
                Ok(count) => {
                    if count > 0 {
                        info!(count, "Pruned dangling images");
                    }
                    report.dangling_removed = count;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to prune dangling images");
                    report.dangling_error = Some(e.to_string());
                }
            }
        }

        Ok(report)
    }
}
