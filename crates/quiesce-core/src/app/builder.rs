//! DetectorBuilder - 検出器の構築とワイヤリング
//!
//! # 方針
//! - Builder パターンで store / clock / config を差し込む
//! - 起動時検証（Fail-fast 設計）: 設定の矛盾は build() で落とす

use std::sync::Arc;

use crate::app::config::{ConfigError, DetectorConfig};
use crate::app::detector::StuckDetector;
use crate::app::reaper_loop::ReaperLoop;
use crate::app::service::TerminationDetector;
use crate::app::status::TerminationEvaluator;
use crate::impls::InMemoryTaskStore;
use crate::ports::{Clock, SystemClock, TaskStore};

/// DetectorBuilder は検出器を構築
///
/// # 使用例
/// ```ignore
/// let app = DetectorBuilder::new()
///     .config(DetectorConfig { staleness_threshold: Duration::from_secs(900), ..Default::default() })
///     .build()?;
/// let report = app.detector.process_status(&process_id).await?;
/// ```
///
/// store を指定しなければ `InMemoryTaskStore`、clock を指定しなければ `SystemClock`。
pub struct DetectorBuilder {
    store: Option<Arc<dyn TaskStore>>,
    clock: Option<Arc<dyn Clock>>,
    config: DetectorConfig,
}

/// BuildError は検出器構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid detector configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

impl DetectorBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            clock: None,
            config: DetectorConfig::default(),
        }
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn config(mut self, config: DetectorConfig) -> Self {
        self.config = config;
        self
    }

    /// 設定を検証して部品を組み立てる
    ///
    /// # 検証
    /// - `DetectorConfig::validate` が失敗すれば BuildError::InvalidConfig
    pub fn build(self) -> Result<DetectorApp, BuildError> {
        self.config.validate()?;

        let store: Arc<dyn TaskStore> = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryTaskStore::new()),
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };

        let detector = StuckDetector::new(Arc::clone(&store), self.config.staleness_threshold);
        let evaluator = TerminationEvaluator::new(Arc::clone(&store), detector);
        let service = TerminationDetector::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            evaluator,
            &self.config,
        );
        let reaper = ReaperLoop::new(store, clock, self.config.reaper_interval);

        Ok(DetectorApp {
            detector: service,
            reaper,
            config: self.config,
        })
    }
}

impl Default for DetectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 組み立て済みの検出器
///
/// reaper はまだ起動していない。`reaper.spawn()` で起動する。
pub struct DetectorApp {
    pub detector: TerminationDetector,
    pub reaper: ReaperLoop,
    pub config: DetectorConfig,
}
