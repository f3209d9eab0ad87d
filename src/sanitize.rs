//! 文件名规范化：变音字母替换、非法字符替换与下划线折叠。

/// Umlaut replacements applied before any other step.
const DIACRITICS: &[(char, &str)] = &[
    ('ä', "ae"),
    ('ö', "oe"),
    ('ü', "ue"),
    ('ß', "ss"),
    ('Ä', "Ae"),
    ('Ö', "Oe"),
    ('Ü', "Ue"),
];

/// Maps a client supplied file name to a safe, flat file system name.
///
/// Umlauts become ASCII digraphs, every character outside `[A-Za-z0-9._-]`
/// becomes `_`, and runs of underscores collapse into one. The result is
/// stable under repeated application.
pub fn normalize_filename(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    for ch in name.chars() {
        if let Some((_, replacement)) = DIACRITICS.iter().find(|(from, _)| *from == ch) {
            normalized.push_str(replacement);
            continue;
        }
        let ch = if is_safe_char(ch) { ch } else { '_' };
        if ch == '_' && normalized.ends_with('_') {
            continue;
        }
        normalized.push(ch);
    }
    normalized
}

/// 返回最后一个 `.` 之后的小写扩展名，没有 `.` 时为空串。
pub fn file_extension(name: &str) -> String {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

fn is_safe_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn umlauts_and_spaces_are_replaced() {
        assert_eq!(normalize_filename("Bär Ä.exe"), "Baer_Ae.exe");
        assert_eq!(normalize_filename("Größe Übersicht.pdf"), "Groesse_Uebersicht.pdf");
        assert_eq!(normalize_filename("Öl-Straße_ü.txt"), "Oel-Strasse_ue.txt");
    }

    #[test]
    fn underscore_runs_collapse() {
        assert_eq!(normalize_filename("a  b__c.txt"), "a_b_c.txt");
        assert_eq!(normalize_filename("__x__"), "_x_");
        assert_eq!(normalize_filename("é ñ.txt"), "_.txt");
    }

    #[test]
    fn path_separators_cannot_escape() {
        assert_eq!(normalize_filename("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(normalize_filename("C:\\temp\\a.txt"), "C_temp_a.txt");
    }

    #[test]
    fn other_case_is_untouched() {
        assert_eq!(normalize_filename("README.TXT"), "README.TXT");
        assert_eq!(normalize_filename("é"), "_");
    }

    #[test]
    fn normalization_is_idempotent() {
        let inputs = [
            "Bär Ä.exe",
            "ßßß  üü.txt",
            "  leading and trailing  ",
            "日本語のファイル.png",
            "already_clean-name.v2.docx",
            "mixed_ _Ö_ _ä.gif",
            "",
        ];
        for input in inputs {
            let once = normalize_filename(input);
            assert_eq!(normalize_filename(&once), once, "input: {input:?}");
            assert!(
                !once.chars().any(|c| "äöüßÄÖÜ".contains(c)),
                "diacritic left in {once:?}"
            );
        }
    }

    #[test]
    fn extension_is_text_after_last_dot() {
        assert_eq!(file_extension("archive.tar.GZ"), "gz");
        assert_eq!(file_extension(".txt"), "txt");
        assert_eq!(file_extension("noext"), "");
        assert_eq!(file_extension("trailing."), "");
    }
}
