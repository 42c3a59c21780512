use crate::dataset::Dataset;
use crate::models::Value;

pub fn normalize_text(input: &str) -> String {
    use unicode_normalization::UnicodeNormalization;
    // Remove diacritics by decomposing to NFD and filtering combining marks
    input
        .nfd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Comparison key of one row over `fields` (column indices). `None` when every field is null,
/// so blank rows never pair with each other.
pub fn row_key(row: &[Value], fields: &[usize]) -> Option<String> {
    let parts: Vec<String> = fields
        .iter()
        .map(|&i| row[i].as_key().map(|s| normalize_text(&s)).unwrap_or_default())
        .collect();
    if parts.iter().all(|p| p.is_empty()) { None } else { Some(parts.join("\u{1f}")) }
}

/// Resolve key field names against a dataset's columns.
pub fn key_indices(ds: &Dataset, fields: &[String]) -> Option<Vec<usize>> {
    fields.iter().map(|f| ds.column_index(f)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text_diacritics() {
        assert_eq!(normalize_text("Álvaro"), "alvaro");
        assert_eq!(normalize_text("ÉÉ"), "ee");
        assert_eq!(normalize_text("  Société   Générale  "), "societe generale");
    }

    #[test]
    fn test_row_key() {
        let row = vec![Value::Text("Acme Ltd".into()), Value::Null, Value::Text("GB".into())];
        assert_eq!(row_key(&row, &[0, 2]), row_key(&[Value::Text("ACME  ltd".into()), Value::Text("gb".into())], &[0, 1]));
        assert_eq!(row_key(&row, &[1]), None);
    }
}
