use encoding_rs::Encoding;
use std::borrow::Cow;

/// Names accepted in configs that are not WHATWG labels once `_` is replaced
/// by `-`.
const ALIASES: &[(&str, &str)] = &[
    ("latin-1", "latin1"),
    ("iso8859-1", "iso-8859-1"),
    ("iso8859-15", "iso-8859-15"),
    ("cp932", "shift_jis"),
    ("ms932", "shift_jis"),
    ("sjis", "shift_jis"),
    ("shift-jis", "shift_jis"),
    ("eucjp", "euc-jp"),
    ("euckr", "euc-kr"),
    ("cp936", "gbk"),
    ("cp949", "euc-kr"),
    ("cp950", "big5"),
    ("utf-8-sig", "utf-8"),
    ("u8", "utf-8"),
];

/// Look up an encoding by a configured name such as `utf_8`, `latin_1` or
/// `cp1252`.
pub fn resolve_encoding(name: &str) -> Option<&'static Encoding> {
    let normalized = name.trim().to_ascii_lowercase().replace('_', "-");
    if let Some(encoding) = Encoding::for_label(normalized.as_bytes()) {
        return Some(encoding);
    }
    // WHATWG labels such as `shift_jis` keep their underscore.
    if let Some(encoding) = Encoding::for_label(name.trim().as_bytes()) {
        return Some(encoding);
    }
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == normalized)
        .and_then(|(_, label)| Encoding::for_label(label.as_bytes()))
}

/// Decode raw bytes strictly. On malformed input the replacement decode is
/// used instead and the second element is `true`.
pub fn decode<'a>(bytes: &'a [u8], encoding: &'static Encoding) -> (Cow<'a, str>, bool) {
    if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(bytes) {
        return (text, false);
    }
    let (text, _) = encoding.decode_without_bom_handling(bytes);
    (text, true)
}
