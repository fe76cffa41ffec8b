//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（KVS、時計）へのインターフェースを提供し、
//! 実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - KVS が source of truth（正本）。プロセスはレコード集合から導出するビューに過ぎない
//! - サービス側は状態を持たない。協調はすべて条件付き書き込みで行う

pub mod clock;
pub mod task_store;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::task_store::{StoreError, TaskStore, WriteCondition};
