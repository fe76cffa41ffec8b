//! Errors - エラー型と分類
//!
//! 呼び出し側に見えるのはここで定義するエラーだけです。
//! - 入力不正は store に触る前に弾く（Client）
//! - store の障害はそのまま伝播する（Transient、リトライ可能）
//! - stuck フラグの書き込み競合は内部で解決し、ここには現れない

use thiserror::Error;

use super::ids::TaskKey;

/// ErrorKind は呼び出し側がどう振る舞うべきかの分類
///
/// # 分類
/// - Client: リクエストを直さない限り何度送っても失敗する
/// - Transient: 一時的なエラー（バックオフしてそのまま再送してよい）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Client,
    Transient,
}

/// DetectorError はサービス層のエラー
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("invalid {kind} id: {reason}")]
    InvalidInput { kind: &'static str, reason: String },

    #[error("task store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("gave up on {key} after {attempts} conflicting writes")]
    Contention { key: TaskKey, attempts: u32 },
}

impl DetectorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DetectorError::InvalidInput { .. } => ErrorKind::Client,
            DetectorError::StoreUnavailable(_) | DetectorError::Contention { .. } => {
                ErrorKind::Transient
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}
