//! Domain model (IDs, task records, states, process status).
//!
//! ここには I/O を持たない純粋な型と状態遷移だけを置きます。
//! - ids: ProcessId / TaskId / TaskKey
//! - state: TaskState
//! - record: TaskRecord と register/complete の遷移
//! - status: ProcessStatus と集計
//! - errors: DetectorError と分類

pub mod errors;
pub mod ids;
pub mod record;
pub mod state;
pub mod status;

pub use self::errors::{DetectorError, ErrorKind};
pub use self::ids::{Id, IdMarker, ProcessId, TaskId, TaskKey};
pub use self::record::{
    CompletionResult, Heartbeat, RegistrationResult, TaskRecord, deadline_after,
};
pub use self::state::TaskState;
pub use self::status::{ProcessReport, ProcessStatus, StuckTask, TaskCounts};
