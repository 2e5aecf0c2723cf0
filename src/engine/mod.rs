// ==========================================
// 销售预测引擎 - 引擎层
// ==========================================
// 组成:
//   transformer  宽表/长表转换
//   buffer       编辑缓冲区
//   synchronizer 编辑器快照同步
//   delta        增量计算
//   writer       版本化写入
//   rehydrator   缓冲区重建
//   orchestrator 保存编排
// 红线: Engine 不拼 SQL，存储访问一律经由 repository
// ==========================================

pub mod buffer;
pub mod delta;
pub mod error;
pub mod orchestrator;
pub mod rehydrator;
pub mod session;
pub mod synchronizer;
pub mod transformer;
pub mod writer;

pub use buffer::{BufferBase, BufferRow, EditBuffer};
pub use delta::{DeltaComputer, DeltaSet};
pub use error::{EngineError, EngineResult};
pub use orchestrator::{CustomerSaveOutcome, SaveOrchestrator, SaveOutcome, SaveReport};
pub use rehydrator::{Rehydrated, Rehydrator};
pub use session::{CustomerBuffer, EditState, SessionState};
pub use synchronizer::{synchronize, SyncResult};
pub use transformer::{long_to_wide, parse_wide_records, wide_to_long};
pub use writer::{VersionedWriter, WriteOutcome};
