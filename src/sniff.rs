//! 可执行文件魔数检测。

use std::fmt;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Number of leading bytes inspected.
pub const HEADER_LEN: usize = 4;

/// Known executable signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signature {
    Elf,
    WindowsExecutable,
    Shebang,
    JavaClass,
}

const SIGNATURES: &[(Signature, &[u8])] = &[
    (Signature::Elf, b"\x7FELF"),
    (Signature::WindowsExecutable, b"MZ"),
    (Signature::Shebang, b"#!"),
    (Signature::JavaClass, b"\xCA\xFE\xBA\xBE"),
];

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Signature::Elf => "ELF",
            Signature::WindowsExecutable => "MZ",
            Signature::Shebang => "shebang",
            Signature::JavaClass => "Java class",
        };
        f.write_str(label)
    }
}

/// Prefix match of `header` against the known signatures.
pub fn detect_signature(header: &[u8]) -> Option<Signature> {
    SIGNATURES
        .iter()
        .find(|(_, magic)| header.starts_with(magic))
        .map(|(signature, _)| *signature)
}

/// 读取文件前 4 个字节判断是否为可执行文件；无法打开或读取时按可执行处理。
pub async fn is_executable_file(path: &Path) -> bool {
    match read_header(path).await {
        Ok(header) => detect_signature(&header).is_some(),
        Err(_) => true,
    }
}

async fn read_header(path: &Path) -> std::io::Result<Vec<u8>> {
    let file = File::open(path).await?;
    let mut header = Vec::with_capacity(HEADER_LEN);
    file.take(HEADER_LEN as u64).read_to_end(&mut header).await?;
    Ok(header)
}
