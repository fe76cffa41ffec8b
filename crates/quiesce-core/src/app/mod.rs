//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **DetectorBuilder**: 検出器の構築とワイヤリング（設定の起動時検証）
//! - **TerminationDetector**: register / complete / status の 3 操作
//! - **StuckDetector**: 評価時の遅延 stuck 判定
//! - **TerminationEvaluator**: レコード集合からプロセス状態を導出
//! - **ReaperLoop**: 期限切れレコードの物理削除

pub mod builder;
pub mod config;
pub mod detector;
pub mod reaper_loop;
pub mod service;
pub mod status;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, DetectorApp, DetectorBuilder};
pub use self::config::{ConfigError, DetectorConfig};
pub use self::detector::StuckDetector;
pub use self::reaper_loop::{ReaperHandle, ReaperLoop};
pub use self::service::{Completion, Registration, TerminationDetector};
pub use self::status::TerminationEvaluator;
