//! quiesce-core
//!
//! Core building blocks for the quiesce termination detector.
//!
//! タスクが自分の開始（heartbeat）と完了を報告し、プロセスの状態
//! （TERMINATED / ACTIVE / STUCK / UNKNOWN）は問い合わせのたびにタスクレコードから導出する。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, record, status, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, Clock）
//! - **app**: アプリケーションロジック（builder, service, detector, status, reaper_loop）
//! - **impls**: 実装（InMemoryTaskStore）

pub mod domain;
pub mod ports;
pub mod app;
pub mod impls;
