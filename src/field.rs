//! Raw upload structure for one multipart form field.
//!
//! An HTML form field may carry a single file (`field`, `field[k]`) or several
//! (`field[k][]`). Every slot of an [`UploadField`] is therefore a
//! [`Shape`]: either one [`RawFile`] or an ordered list of them. All per-file
//! properties travel together in a `RawFile`, so they always share the shape
//! of `name`.

use std::fmt;
use std::path::PathBuf;

/// Scalar or sequence value of one field slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape<T> {
    Scalar(T),
    Sequence(Vec<T>),
}

impl<T> Shape<T> {
    /// Expands the slot into `(file_index, value)` pairs. A scalar sits at the
    /// synthetic index `0`.
    pub fn indexed(&self) -> Vec<(usize, &T)> {
        match self {
            Shape::Scalar(value) => vec![(0, value)],
            Shape::Sequence(values) => values.iter().enumerate().collect(),
        }
    }
}

/// Upload status reported for a single file part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadErrorCode {
    Ok,
    /// Larger than the server-side per-file limit.
    IniSize,
    /// Larger than the form's `MAX_FILE_SIZE`.
    FormSize,
    Partial,
    NoFile,
    NoTmpDir,
    CantWrite,
}

impl UploadErrorCode {
    /// Numeric code written to the debug trace.
    pub fn code(self) -> i64 {
        match self {
            UploadErrorCode::Ok => 0,
            UploadErrorCode::IniSize => 1,
            UploadErrorCode::FormSize => 2,
            UploadErrorCode::Partial => 3,
            UploadErrorCode::NoFile => 4,
            UploadErrorCode::NoTmpDir => 6,
            UploadErrorCode::CantWrite => 7,
        }
    }

    /// 上传错误码对应的提示信息。
    pub fn message(self) -> &'static str {
        match self {
            UploadErrorCode::Ok => "Kein Fehler",
            UploadErrorCode::IniSize => "Die Datei ist größer als die erlaubte Größe",
            UploadErrorCode::FormSize => {
                "Die Datei ist größer als die im Formular angegebene Größe"
            }
            UploadErrorCode::Partial => "Die Datei wurde nur teilweise hochgeladen",
            UploadErrorCode::NoFile => "Es wurde keine Datei hochgeladen",
            UploadErrorCode::NoTmpDir => "Temporärer Ordner fehlt",
            UploadErrorCode::CantWrite => "Fehler beim Schreiben der Datei auf die Festplatte",
        }
    }
}

impl fmt::Display for UploadErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// One submitted file part with all of its properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFile {
    pub name: String,
    pub mime_type: String,
    /// Spooled location; empty when the part failed during intake.
    pub tmp_name: PathBuf,
    pub error: UploadErrorCode,
    pub size: u64,
}

impl RawFile {
    /// A part that failed before its content reached the spool.
    pub fn failed(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        error: UploadErrorCode,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            tmp_name: PathBuf::new(),
            error,
            size: 0,
        }
    }
}

/// A keyed slot of an [`UploadField`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSlot {
    pub key: String,
    pub value: Shape<RawFile>,
}

/// Where a part lands inside the field, derived from its form name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotTarget {
    /// `field` without brackets: the whole field is one file.
    Whole,
    /// `field[]`: next numeric slot, scalar.
    Append,
    /// `field[k]`: slot `k`, scalar.
    Keyed(String),
    /// `field[k][]` or deeper: slot `k`, sequence.
    Nested(String),
}

/// Splits `base[a][b]` into `("base", SlotTarget)`.
///
/// Returns `None` for names with unbalanced brackets.
pub fn parse_field_name(name: &str) -> Option<(&str, SlotTarget)> {
    let Some(open) = name.find('[') else {
        return Some((name, SlotTarget::Whole));
    };
    let base = &name[..open];
    let mut keys = Vec::new();
    let mut rest = &name[open..];
    while !rest.is_empty() {
        let inner = rest.strip_prefix('[')?;
        let close = inner.find(']')?;
        keys.push(&inner[..close]);
        rest = &inner[close + 1..];
    }
    let target = match keys.as_slice() {
        [] | [""] => SlotTarget::Append,
        [key] => SlotTarget::Keyed((*key).to_string()),
        [key, ..] => SlotTarget::Nested((*key).to_string()),
    };
    Some((base, target))
}

/// 单个表单字段提交的原始上传结构。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadField {
    slots: Vec<FieldSlot>,
    bare: bool,
}

impl UploadField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slots(&self) -> &[FieldSlot] {
        &self.slots
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// True when the field was submitted without brackets. Its single file
    /// still sits in slot `0`.
    pub fn is_bare(&self) -> bool {
        self.bare
    }

    /// Total number of files over all slots.
    pub fn file_count(&self) -> usize {
        self.slots
            .iter()
            .map(|slot| match &slot.value {
                Shape::Scalar(_) => 1,
                Shape::Sequence(files) => files.len(),
            })
            .sum()
    }

    /// Sum of the sizes of every file part.
    pub fn total_size(&self) -> u64 {
        self.files().map(|file| file.size).sum()
    }

    /// Every file in slot order.
    pub fn files(&self) -> impl Iterator<Item = &RawFile> {
        self.slots.iter().flat_map(|slot| match &slot.value {
            Shape::Scalar(file) => std::slice::from_ref(file).iter(),
            Shape::Sequence(files) => files.iter(),
        })
    }

    /// Places `file` according to `target`. A keyed scalar replaces whatever
    /// the slot held before; a nested push turns a scalar slot into a sequence.
    /// A bare part replaces the whole field.
    pub fn insert(&mut self, target: SlotTarget, file: RawFile) {
        if matches!(target, SlotTarget::Whole) {
            self.slots = vec![FieldSlot {
                key: "0".to_string(),
                value: Shape::Scalar(file),
            }];
            self.bare = true;
            return;
        }
        self.bare = false;
        match target {
            SlotTarget::Whole => {}
            SlotTarget::Append => {
                let key = self.next_index().to_string();
                self.slots.push(FieldSlot {
                    key,
                    value: Shape::Scalar(file),
                });
            }
            SlotTarget::Keyed(key) => match self.slot_mut(&key) {
                Some(slot) => slot.value = Shape::Scalar(file),
                None => self.slots.push(FieldSlot {
                    key,
                    value: Shape::Scalar(file),
                }),
            },
            SlotTarget::Nested(key) => match self.slot_mut(&key) {
                Some(slot) => match &mut slot.value {
                    Shape::Sequence(files) => files.push(file),
                    Shape::Scalar(_) => slot.value = Shape::Sequence(vec![file]),
                },
                None => self.slots.push(FieldSlot {
                    key,
                    value: Shape::Sequence(vec![file]),
                }),
            },
        }
    }

    fn slot_mut(&mut self, key: &str) -> Option<&mut FieldSlot> {
        self.slots.iter_mut().find(|slot| slot.key == key)
    }

    fn next_index(&self) -> u64 {
        self.slots
            .iter()
            .filter_map(|slot| slot.key.parse::<u64>().ok())
            .max()
            .map_or(0, |max| max + 1)
    }
}

/// Normalized single-file unit handed to the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub field_index: String,
    pub file_index: usize,
    pub original_name: String,
    pub temp_path: PathBuf,
    pub error: UploadErrorCode,
}
