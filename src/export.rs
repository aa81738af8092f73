// Writes the ranking rows to a spreadsheet-friendly CSV file and reads it back.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::ExportError;
use crate::models::{CategoryFilter, RankingRecord};
use crate::month::MonthRange;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Sort key for rows without a rank; sorts after every real rank.
const MISSING_RANK: u32 = u32::MAX;

/// `dongchedi_sales_{start}_{end}[_bev|_phev].csv`
pub fn artifact_file_name(range: MonthRange, category: Option<CategoryFilter>) -> String {
    let mut name = format!("dongchedi_sales_{}_{}", range.start(), range.end());
    if let Some(category) = category {
        name.push('_');
        name.push_str(category.file_tag());
    }
    name.push_str(".csv");
    name
}

/// Orders rows by month, then rank; unranked rows go last within their month.
/// Ties keep their fetch order.
pub fn sort_records(records: &mut [RankingRecord]) {
    records.sort_by_key(|r| (r.month, r.rank.unwrap_or(MISSING_RANK)));
}

/// Sorts `records` and writes them to `path` with a UTF-8 BOM.
/// Returns the number of data rows written.
pub fn write_csv(records: &mut [RankingRecord], path: &Path) -> Result<usize, ExportError> {
    sort_records(records);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| io_error(path, source))?;
    }

    let mut file = File::create(path).map_err(|source| io_error(path, source))?;
    file.write_all(UTF8_BOM).map_err(|source| io_error(path, source))?;

    let mut writer = csv::Writer::from_writer(file);
    for record in records.iter() {
        writer.serialize(record).map_err(|source| csv_error(path, source))?;
    }
    // An empty result still gets a header row.
    if records.is_empty() {
        writer
            .write_record(["月份", "排名", "车型", "车企", "价格", "销量"])
            .map_err(|source| csv_error(path, source))?;
    }
    writer.flush().map_err(|source| io_error(path, source))?;

    tracing::info!(path = %path.display(), rows = records.len(), "CSV written");
    Ok(records.len())
}

/// Parses a file produced by [`write_csv`].
#[cfg(test)]
pub fn read_csv(path: &Path) -> Result<Vec<RankingRecord>, ExportError> {
    let bytes = fs::read(path).map_err(|source| io_error(path, source))?;
    let content = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes[..]);

    let mut reader = csv::Reader::from_reader(content);
    reader
        .deserialize()
        .collect::<Result<Vec<RankingRecord>, _>>()
        .map_err(|source| csv_error(path, source))
}

fn io_error(path: &Path, source: std::io::Error) -> ExportError {
    ExportError::Io { path: PathBuf::from(path), source }
}

fn csv_error(path: &Path, source: csv::Error) -> ExportError {
    ExportError::Csv { path: PathBuf::from(path), source }
}
