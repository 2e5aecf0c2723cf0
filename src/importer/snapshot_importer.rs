// ==========================================
// 销售预测引擎 - 编辑器快照导入
// ==========================================
// 文件 → 原始记录 → 宽表行（列校验同编辑器快照）
// ==========================================

use crate::domain::forecast::WideRow;
use crate::engine::transformer::parse_wide_records;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::file_parser::UniversalFileParser;
use std::path::Path;
use tracing::info;

pub struct SnapshotImporter {
    default_doc_cur: String,
}

impl SnapshotImporter {
    pub fn new(default_doc_cur: impl Into<String>) -> Self {
        Self {
            default_doc_cur: default_doc_cur.into(),
        }
    }

    /// 读取快照文件
    ///
    /// # 返回
    /// - 空文件 → EmptySnapshot
    /// - 缺列 / 禁用列 / 未知枚举 / 非数值单元 → Snapshot(Schema)
    pub fn import<P: AsRef<Path>>(&self, file_path: P) -> ImportResult<Vec<WideRow>> {
        let path = file_path.as_ref();
        let records = UniversalFileParser.parse(path)?;
        if records.is_empty() {
            return Err(ImportError::EmptySnapshot(path.display().to_string()));
        }

        let rows = parse_wide_records(&records, &self.default_doc_cur)?;
        info!(file = %path.display(), rows = rows.len(), "快照文件已读取");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Metrica, TipoForecast};
    use std::io::Write;
    use tempfile::Builder;

    const HEADER: &str = "ItemCode,ItemName,TipoForecast,Metrica,OcrCode3,DocCur,01,02,03,04,05,06,07,08,09,10,11,12";

    fn write_csv(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(".csv").tempfile().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    #[test]
    fn test_import_csv_snapshot() {
        let file = write_csv(&[
            HEADER,
            "I100,Urea,Firme,Cantidad,Pta-Nutr,CLP,,,,,,,10,20,,,,",
            "I100,Urea,Firme,Precio,Pta-Nutr,,,,,,,,1500,1500,,,,",
        ]);
        let rows = SnapshotImporter::new("CLP").import(file.path()).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].tipo_forecast, TipoForecast::Firme);
        assert_eq!(rows[0].metrica, Metrica::Cantidad);
        assert_eq!(rows[0].months[6], 10.0);
        assert!(rows[0].months[0].is_nan());
        assert_eq!(rows[0].item_name.as_deref(), Some("Urea"));
        // DocCur 为空 → 默认币种
        assert_eq!(rows[1].doc_cur, "CLP");
    }

    #[test]
    fn test_import_rejects_forbidden_column() {
        let file = write_csv(&[
            "ItemCode,TipoForecast,Metrica,OcrCode3,DocCur,PrecioUN,01",
            "I100,Firme,Cantidad,Pta-Nutr,CLP,1500,1",
        ]);
        let err = SnapshotImporter::new("CLP").import(file.path()).unwrap_err();
        assert!(matches!(err, ImportError::Snapshot(_)));
    }

    #[test]
    fn test_import_empty_file() {
        let file = write_csv(&[HEADER]);
        let err = SnapshotImporter::new("CLP").import(file.path()).unwrap_err();
        assert!(matches!(err, ImportError::EmptySnapshot(_)));
    }
}
