//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: 開発用・テスト用の正本（stuck インデックス付き）
//!
//! # 本番用実装
//! KVS（DynamoDB など）の実装は別クレートに配置する想定です。
//! `TaskStore` の条件付き書き込みとインデックス同期の契約を満たせば差し替えられます。

pub mod inmem_store;

// 主要な型を再エクスポート
pub use self::inmem_store::InMemoryTaskStore;
