//! Index token strategies
//!
//! An [`Indexer`] turns one metadata entry into the tokens that make it
//! searchable. The store persists every token twice: bare and scoped by the
//! entry's key (`key:token`), see [`index_values`].

use metaindex_common::{KEYVALUE_SEPARATOR, MetadataEntry};
use std::collections::BTreeSet;

/// Produces the search tokens for a metadata entry
pub trait Indexer: Send + Sync {
    fn indexes(&self, entry: &MetadataEntry) -> BTreeSet<String>;
}

impl<F> Indexer for F
where
    F: Fn(&MetadataEntry) -> BTreeSet<String> + Send + Sync,
{
    fn indexes(&self, entry: &MetadataEntry) -> BTreeSet<String> {
        self(entry)
    }
}

/// Splits values into words on punctuation and whitespace.
///
/// Tags contribute each tag; other entries contribute the whole value.
/// Every such value also contributes its words split on `-`, `_`, `,` and
/// whitespace, so `tag12-tag33` is found by `tag12`, `tag33` and
/// `tag12-tag33`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultIndexer;

impl Indexer for DefaultIndexer {
    fn indexes(&self, entry: &MetadataEntry) -> BTreeSet<String> {
        let values: Vec<&str> = if entry.is_tags() {
            entry
                .value
                .split(|c: char| c == ',' || c.is_whitespace())
                .collect()
        } else {
            vec![entry.value.as_str()]
        };

        let mut tokens = BTreeSet::new();
        for value in values {
            tokens.extend(
                value
                    .split(is_word_separator)
                    .filter(|word| !word.is_empty())
                    .map(str::to_string),
            );
            if !value.is_empty() {
                tokens.insert(value.to_string());
            }
        }
        tokens
    }
}

/// Characters that separate words inside an indexed value
pub(crate) fn is_word_separator(c: char) -> bool {
    matches!(c, '-' | '_' | ',') || c.is_whitespace()
}

/// Index values persisted for an entry's tokens: each token bare and
/// prefixed with the entry key. An entry without tokens still gets the bare
/// `key:` row so `key:*` finds it.
pub(crate) fn index_values(key: &str, tokens: BTreeSet<String>) -> BTreeSet<String> {
    let mut values = BTreeSet::new();
    for token in tokens {
        if token.is_empty() {
            continue;
        }
        values.insert(format!("{key}{KEYVALUE_SEPARATOR}{token}"));
        values.insert(token);
    }
    if values.is_empty() {
        values.insert(format!("{key}{KEYVALUE_SEPARATOR}"));
    }
    values
}
