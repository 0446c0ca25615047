//! CSV import of tested haplogroup results.

use anyhow::{bail, Context, Result};
use std::io::Read;
use ydna_core::{normalize_profile_id, IMPORTED_SOURCE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRow {
    pub profile_id: String,
    pub haplogroup: String,
    pub source: String,
}

/// Parses an import file. The identifier column is `geni_profile_id` or
/// `profile_id`; `source` is optional. Rows missing an identifier or a
/// haplogroup are skipped.
pub fn read_rows<R: Read>(input: R) -> Result<Vec<ImportRow>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(input);
    let headers = reader.headers().context("failed to read import header")?.clone();
    let column = |name: &str| headers.iter().position(|header| header == name);

    let Some(id_column) = column("geni_profile_id").or_else(|| column("profile_id")) else {
        bail!("import file needs a geni_profile_id or profile_id column");
    };
    let Some(haplogroup_column) = column("haplogroup") else {
        bail!("import file needs a haplogroup column");
    };
    let source_column = column("source");

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("malformed import row {}", index + 2))?;
        let field = |col: usize| record.get(col).filter(|value| !value.is_empty());
        let (Some(raw_id), Some(haplogroup)) = (field(id_column), field(haplogroup_column)) else {
            continue;
        };
        rows.push(ImportRow {
            profile_id: normalize_profile_id(raw_id),
            haplogroup: haplogroup.to_string(),
            source: source_column
                .and_then(field)
                .unwrap_or(IMPORTED_SOURCE)
                .to_string(),
        });
    }
    Ok(rows)
}
