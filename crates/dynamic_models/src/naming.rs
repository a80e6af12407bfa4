//! Turning human names into model, table, and column names.
//!
//! Users name their models and fields with arbitrary text ("Simple Model", "date of birth").  Table and column names
//! are derived by slugifying: lowercase, punctuation stripped, runs of whitespace and hyphens collapsed.  Model names
//! are the title-cased words joined together.
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref STRIP: Regex = Regex::new(r"[^\w\s-]").unwrap();
    static ref DASHES: Regex = Regex::new(r"[-\s]+").unwrap();
    static ref IDENTIFIER: Regex = Regex::new(r"^[a-z_][a-z0-9_]*$").unwrap();
}

/// Slugify a name: `"Hello, World  two"` becomes `"hello-world-two"`.
pub fn slugify(name: &str) -> String {
    let lowered = name.to_lowercase();
    let stripped = STRIP.replace_all(&lowered, "");
    let dashed = DASHES.replace_all(stripped.trim(), "-");
    dashed.trim_matches(|c| c == '-' || c == '_').to_string()
}

/// The name of a table or column derived from a human name.
pub fn table_or_column_name(name: &str) -> String {
    slugify(name).replace('-', "_")
}

/// The name of the model, e.g. `"simple model"` is `"SimpleModel"`.
pub fn model_class_name(name: &str) -> String {
    name.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(|c| c.to_lowercase()))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Whether a derived name may be used unquoted as an sqlite identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// Quote an identifier for use in SQL.
///
/// Everything we quote has already been through [is_valid_identifier], so this is about keywords, not injection.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name)
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Simple Model"), "simple-model");
        assert_eq!(slugify("  Hello, World!  two "), "hello-world-two");
        assert_eq!(slugify("already_snake"), "already_snake");
        assert_eq!(slugify("--dashes--"), "dashes");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_table_or_column_name() {
        assert_eq!(table_or_column_name("Simple Model"), "simple_model");
        assert_eq!(table_or_column_name("date-of birth"), "date_of_birth");
    }

    #[test]
    fn test_model_class_name() {
        assert_eq!(model_class_name("simple model"), "SimpleModel");
        assert_eq!(model_class_name("ANOTHER   model"), "AnotherModel");
        assert_eq!(model_class_name(""), "");
    }

    #[test]
    fn test_identifiers() {
        assert!(is_valid_identifier("simple_model"));
        assert!(is_valid_identifier("_x1"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("1abc"));
        assert!(!is_valid_identifier("has space"));
    }

    proptest! {
        #[test]
        fn ascii_names_make_identifiers(name in "[A-Za-z][A-Za-z0-9 ,.!-]{0,30}") {
            let derived = table_or_column_name(&name);
            prop_assert!(derived.is_empty() || is_valid_identifier(&derived));
        }

        #[test]
        fn slugify_is_idempotent(name in "[A-Za-z0-9 _!,.-]{0,40}") {
            let once = slugify(&name);
            prop_assert_eq!(slugify(&once), once.clone());
        }
    }
}
