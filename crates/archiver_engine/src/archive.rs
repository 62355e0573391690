use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::filename::entry_filename;
use crate::package::{Package, PackageError};
use crate::ContentUnit;

pub const ERROR_SUFFIX: &str = "_ERROR.txt";

/// Text written in place of a unit that failed both passes.
pub fn failure_notice(unit: &ContentUnit) -> String {
    format!(
        "Document \"{}\" (id {}) could not be retrieved after repeated attempts.\n",
        unit.label, unit.key
    )
}

/// Entry name for a unit: its content file, or the error marker for a failed unit.
pub fn archive_entry_name(unit: &ContentUnit, content_suffix: &str) -> String {
    if unit.is_fetched() {
        entry_filename(unit.sequence, &unit.label, content_suffix)
    } else {
        entry_filename(unit.sequence, &unit.label, ERROR_SUFFIX)
    }
}

/// Flat archive with exactly one entry per unit, in sequence order.
pub fn build_flat_archive(
    filename: String,
    units: &[ContentUnit],
    content_suffix: &str,
) -> Result<Package, PackageError> {
    if units.is_empty() {
        return Err(PackageError::Empty);
    }
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for unit in units {
        zip.start_file(archive_entry_name(unit, content_suffix), options)?;
        match (&unit.raw_content, unit.is_fetched()) {
            (Some(content), true) => zip.write_all(content.as_bytes())?,
            _ => zip.write_all(failure_notice(unit).as_bytes())?,
        }
    }
    let bytes = zip.finish()?.into_inner();
    Ok(Package { filename, bytes })
}
