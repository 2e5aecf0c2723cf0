// ==========================================
// 销售预测引擎 - 导入层
// ==========================================
// 职责: 从文件读取编辑器快照（宽表）
// 支持: Excel, CSV
// ==========================================

pub mod error;
pub mod file_parser;
pub mod snapshot_importer;

pub use error::{ImportError, ImportResult};
pub use file_parser::{CsvParser, ExcelParser, FileParser, RawRecord, UniversalFileParser};
pub use snapshot_importer::SnapshotImporter;
