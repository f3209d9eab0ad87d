//! 上传结构分析：把字段结构展开为逐文件条目，并生成调试用的结构描述。

use crate::field::{FileEntry, RawFile, Shape, UploadField};

/// Properties listed in the structural trace, in output order, with the type
/// label a single value carries.
const PROPERTIES: &[(&str, &str, fn(&RawFile) -> String)] = &[
    ("name", "string", name_of),
    ("type", "string", type_of),
    ("tmp_name", "string", tmp_name_of),
    ("error", "integer", error_of),
    ("size", "integer", size_of),
];

fn name_of(file: &RawFile) -> String {
    file.name.clone()
}

fn type_of(file: &RawFile) -> String {
    file.mime_type.clone()
}

fn tmp_name_of(file: &RawFile) -> String {
    file.tmp_name.display().to_string()
}

fn error_of(file: &RawFile) -> String {
    file.error.to_string()
}

fn size_of(file: &RawFile) -> String {
    file.size.to_string()
}

/// Lazily walks the field in slot order.
///
/// Sequence slots yield one entry per sub-index; a scalar slot yields a single
/// entry at file index `0`. An empty field yields nothing.
pub fn file_entries(field: &UploadField) -> impl Iterator<Item = FileEntry> + '_ {
    field.slots().iter().flat_map(|slot| {
        slot.value
            .indexed()
            .into_iter()
            .map(move |(file_index, file)| FileEntry {
                field_index: slot.key.clone(),
                file_index,
                original_name: file.name.clone(),
                temp_path: file.tmp_name.clone(),
                error: file.error,
            })
    })
}

/// Describes every property of the field, one line per slot. A bare field
/// only reports the scalar type of each property.
pub fn structure_trace(field: &UploadField) -> Vec<String> {
    let mut lines = vec!["=== ANALYZING FILES STRUCTURE ===".to_string()];
    if !field.is_empty() {
        for (property, scalar_type, project) in PROPERTIES {
            if field.is_bare() {
                lines.push(format!("Property: '{property}' - Type: {scalar_type}"));
                continue;
            }
            lines.push(format!("Property: '{property}' - Type: array"));
            for slot in field.slots() {
                let values = match &slot.value {
                    Shape::Scalar(file) => project(file),
                    Shape::Sequence(files) => files
                        .iter()
                        .map(|file| project(file))
                        .collect::<Vec<_>>()
                        .join(", "),
                };
                lines.push(format!("  Field[{}]: {values}", slot.key));
            }
        }
    }
    lines.push(String::new());
    lines
}
