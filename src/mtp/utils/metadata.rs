use std::time::SystemTime;

use crate::mtp::dataset::ObjectInfo;
use crate::mtp::handle_table::HandleEntry;
use crate::mtp::types::{
    ASSOCIATION_GENERIC_FOLDER, ASSOCIATION_UNDEFINED, FORMAT_ASSOCIATION, FORMAT_UNDEFINED,
    PROTECTION_NONE, SUPPORTED_STORAGE_ID,
};

pub struct MetadataConverter;

impl MetadataConverter {
    pub fn to_object_info(entry: &HandleEntry, metadata: &std::fs::Metadata) -> ObjectInfo {
        let is_dir = metadata.is_dir();
        ObjectInfo {
            storage_id: SUPPORTED_STORAGE_ID,
            object_format: if is_dir { FORMAT_ASSOCIATION } else { FORMAT_UNDEFINED },
            protection_status: PROTECTION_NONE,
            compressed_size: if is_dir {
                0
            } else {
                u32::try_from(metadata.len()).unwrap_or(u32::MAX)
            },
            parent_object: entry.parent,
            association_type: if is_dir {
                ASSOCIATION_GENERIC_FOLDER
            } else {
                ASSOCIATION_UNDEFINED
            },
            filename: entry.name.clone(),
            date_created: Self::format_datetime(metadata.created().ok()),
            date_modified: Self::format_datetime(metadata.modified().ok()),
        }
    }

    /// `YYYYMMDDThhmmss` in UTC, or empty when the filesystem has no date.
    pub fn format_datetime(time: Option<SystemTime>) -> String {
        match time {
            Some(time) => {
                let datetime = chrono::DateTime::<chrono::Utc>::from(time);
                datetime.format("%Y%m%dT%H%M%S").to_string()
            }
            None => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn datetime_uses_compact_utc_form() {
        let time = SystemTime::UNIX_EPOCH + Duration::from_secs(1_754_674_500);
        assert_eq!(
            MetadataConverter::format_datetime(Some(time)),
            "20250808T173500"
        );
        assert_eq!(MetadataConverter::format_datetime(None), "");
    }

    #[test]
    fn directories_report_folder_association() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let metadata = std::fs::metadata(temp_dir.path()).unwrap();
        let entry = HandleEntry {
            handle: 1,
            parent: 0,
            is_dir: true,
            name: "photos".to_string(),
        };
        let info = MetadataConverter::to_object_info(&entry, &metadata);
        assert_eq!(info.object_format, FORMAT_ASSOCIATION);
        assert_eq!(info.association_type, ASSOCIATION_GENERIC_FOLDER);
        assert_eq!(info.compressed_size, 0);
        assert_eq!(info.filename, "photos");
    }
}
