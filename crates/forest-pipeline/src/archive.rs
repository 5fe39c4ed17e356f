//! Zip bundle of an analysis result.

use std::io::{Cursor, Write};

use bytes::Bytes;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{PipelineError, PipelineResult};
use crate::statistics::{ForestAreaTable, STACK_FILE};

/// Name of the statistics table inside the bundle.
pub const STATISTICS_FILE: &str = "statistics.json";

/// Pack the area table and the stacked raster into a zip archive.
///
/// The raster is already compressed and is stored as-is.
pub fn bundle(table: &ForestAreaTable, raster: &[u8]) -> PipelineResult<Bytes> {
    let failed = |e: &dyn std::fmt::Display| PipelineError::Workspace(format!("cannot build archive: {e}"));

    let json = serde_json::to_vec_pretty(table).map_err(|e| failed(&e))?;
    let mut writer = ZipWriter::new(Cursor::new(Vec::with_capacity(raster.len() + json.len() + 512)));

    writer
        .start_file(
            STATISTICS_FILE,
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
        )
        .map_err(|e| failed(&e))?;
    writer.write_all(&json).map_err(|e| failed(&e))?;

    writer
        .start_file(
            STACK_FILE,
            SimpleFileOptions::default()
                .compression_method(CompressionMethod::Stored)
                .large_file(raster.len() as u64 >= u64::from(u32::MAX)),
        )
        .map_err(|e| failed(&e))?;
    writer.write_all(raster).map_err(|e| failed(&e))?;

    let cursor = writer.finish().map_err(|e| failed(&e))?;
    Ok(Bytes::from(cursor.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Read;

    #[test]
    fn test_bundle_contents() {
        let table = ForestAreaTable(BTreeMap::from([(2000, 12.5), (2001, 11.25)]));
        let raster = b"II*\0fake-cog".to_vec();

        let bytes = bundle(&table, &raster).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
        assert_eq!(archive.len(), 2);

        let mut json = String::new();
        archive.by_name(STATISTICS_FILE).unwrap().read_to_string(&mut json).unwrap();
        let parsed: ForestAreaTable = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, table);

        let mut tif = Vec::new();
        archive.by_name(STACK_FILE).unwrap().read_to_end(&mut tif).unwrap();
        assert_eq!(tif, raster);
    }
}
