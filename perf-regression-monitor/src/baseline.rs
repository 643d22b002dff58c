//! 基线存储
//!
//! 每个类别保存一个基线快照。加载缺失或损坏的基线返回空快照而不是
//! 错误，调用方将其视为“首次运行，建立基线”。保存是整体原子覆盖，
//! 不与旧数据逐字段合并。

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{BaselineSnapshot, MetricCategory};

/// 基线存储接口
pub trait BaselineStore: Send {
    /// 加载类别基线，缺失或损坏时返回空快照
    fn load(&self, category: MetricCategory) -> BaselineSnapshot;

    /// 整体覆盖保存类别基线
    fn save(&mut self, category: MetricCategory, snapshot: &BaselineSnapshot) -> Result<()>;
}

/// 磁盘上的基线文档：`{ <metricName>: number, ..., "timestamp": ... }`
#[derive(Debug, Serialize, Deserialize)]
struct BaselineDocument {
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    values: BTreeMap<String, f64>,
}

/// 基于 JSON 文件的基线存储
#[derive(Debug, Clone)]
pub struct FileBaselineStore {
    dir: PathBuf,
}

impl FileBaselineStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 类别基线文件路径
    pub fn path_for(&self, category: MetricCategory) -> PathBuf {
        self.dir.join(format!("{}-baseline.json", category.tag()))
    }

    fn read_document(path: &Path) -> Result<BaselineDocument> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl BaselineStore for FileBaselineStore {
    fn load(&self, category: MetricCategory) -> BaselineSnapshot {
        let path = self.path_for(category);
        if !path.exists() {
            tracing::debug!("No baseline for {} at {}", category, path.display());
            return BaselineSnapshot::empty(category);
        }
        match Self::read_document(&path) {
            Ok(doc) => BaselineSnapshot {
                category,
                values: doc.values,
                timestamp: doc.timestamp,
            },
            Err(e) => {
                tracing::warn!(
                    "Discarding unreadable baseline {}: {}",
                    path.display(),
                    e
                );
                BaselineSnapshot::empty(category)
            }
        }
    }

    fn save(&mut self, category: MetricCategory, snapshot: &BaselineSnapshot) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let doc = BaselineDocument {
            timestamp: snapshot.timestamp,
            values: snapshot.values.clone(),
        };
        let json = serde_json::to_string_pretty(&doc)?;

        // 写入同目录临时文件后重命名，读者只会看到完整的旧文件或新文件
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.flush()?;
        let path = self.path_for(category);
        tmp.persist(&path).map_err(|e| e.error)?;
        tracing::debug!("Baseline for {} written to {}", category, path.display());
        Ok(())
    }
}

/// 内存基线存储
#[derive(Debug, Clone, Default)]
pub struct MemoryBaselineStore {
    snapshots: HashMap<MetricCategory, BaselineSnapshot>,
    saves: usize,
}

impl MemoryBaselineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置基线
    pub fn with_snapshot(mut self, snapshot: BaselineSnapshot) -> Self {
        self.snapshots.insert(snapshot.category, snapshot);
        self
    }

    /// 累计保存次数
    pub fn save_count(&self) -> usize {
        self.saves
    }
}

impl BaselineStore for MemoryBaselineStore {
    fn load(&self, category: MetricCategory) -> BaselineSnapshot {
        self.snapshots
            .get(&category)
            .cloned()
            .unwrap_or_else(|| BaselineSnapshot::empty(category))
    }

    fn save(&mut self, category: MetricCategory, snapshot: &BaselineSnapshot) -> Result<()> {
        let mut stored = snapshot.clone();
        stored.category = category;
        self.snapshots.insert(category, stored);
        self.saves += 1;
        Ok(())
    }
}
