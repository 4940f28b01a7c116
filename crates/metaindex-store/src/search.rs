//! Search over the namespace-scoped token index
//!
//! A query is a whitespace-separated list of terms combined with AND: an
//! entity qualifies when every term hits at least one of its entries. Each
//! term is either bare (`foo`, `foo*`) or scoped to one property key
//! (`key:value`, `key:value*`, `key:*`). Whitespace around the `:` of a
//! scoped term is ignored.
//!
//! Matching is case-insensitive. The word separators `-`, `_` and `,` are
//! token boundaries: `foo-bar` hits an entry indexed as `foo-bar`, or one
//! indexed with both `foo` and `bar`. A term made only of separators is
//! ignored; any other term that cannot match (`*`, `key:`) empties the
//! result.

use crate::codec;
use crate::error::MetadataResult;
use crate::indexer::is_word_separator;
use crate::store::MetadataStore;
use crate::tables;
use metaindex_common::{
    EntityId, KEYVALUE_SEPARATOR, MetadataEntry, SYSTEM_NAMESPACE, SearchTarget,
};
use redb::ReadableTable;
use std::collections::HashSet;
use tracing::{debug, warn};

/// One lookup into the token index
#[derive(Clone, Debug, PartialEq, Eq)]
struct TokenMatch {
    /// Folded token, or token prefix when `prefix` is set
    token: String,
    prefix: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct SearchTerm {
    whole: TokenMatch,
    /// Separator-delimited pieces that must all hit the same entry. Empty
    /// when the term has no separators.
    fragments: Vec<TokenMatch>,
}

#[derive(Debug, PartialEq, Eq)]
enum ParsedTerm {
    Term(SearchTerm),
    /// Only separators; ignored
    Separators,
    /// Can never match
    Unmatchable,
}

impl SearchTerm {
    fn parse(term: &str) -> ParsedTerm {
        match term.split_once(KEYVALUE_SEPARATOR) {
            Some((key, value)) => Self::scoped(key.trim(), value.trim()),
            None => Self::bare(term),
        }
    }

    fn bare(term: &str) -> ParsedTerm {
        let (value, prefix) = split_wildcard(term);
        if value.is_empty() {
            return ParsedTerm::Unmatchable;
        }
        if value.chars().all(is_word_separator) {
            return ParsedTerm::Separators;
        }
        ParsedTerm::Term(Self::build("", value, prefix))
    }

    fn scoped(key: &str, value: &str) -> ParsedTerm {
        if key.is_empty() {
            return ParsedTerm::Unmatchable;
        }
        let scope = format!("{}{KEYVALUE_SEPARATOR}", codec::fold(key));
        let (value, prefix) = split_wildcard(value);
        if value.is_empty() {
            // `key:*` lists every entry of the key
            return if prefix {
                ParsedTerm::Term(Self::build(&scope, value, true))
            } else {
                ParsedTerm::Unmatchable
            };
        }
        if value.chars().all(is_word_separator) {
            return ParsedTerm::Separators;
        }
        ParsedTerm::Term(Self::build(&scope, value, prefix))
    }

    fn build(scope: &str, value: &str, prefix: bool) -> Self {
        let value = codec::fold(value);
        let fragments = if value.contains(is_word_separator) {
            let words: Vec<&str> = value
                .split(is_word_separator)
                .filter(|word| !word.is_empty())
                .collect();
            // The wildcard only extends a trailing word
            let open_end = prefix && !value.ends_with(is_word_separator);
            words
                .iter()
                .enumerate()
                .map(|(i, word)| TokenMatch {
                    token: format!("{scope}{word}"),
                    prefix: open_end && i + 1 == words.len(),
                })
                .collect()
        } else {
            Vec::new()
        };
        Self {
            whole: TokenMatch {
                token: format!("{scope}{value}"),
                prefix,
            },
            fragments,
        }
    }
}

fn split_wildcard(term: &str) -> (&str, bool) {
    term.strip_suffix('*')
        .map_or((term, false), |value| (value, true))
}

/// Terms of `query`, or `None` when some term can never match
fn parse_query(query: &str) -> Option<Vec<SearchTerm>> {
    // Rejoin `key : value` split by whitespace
    let mut words: Vec<String> = Vec::new();
    let mut join_next = false;
    for word in query.split_whitespace() {
        let joins = join_next
            || (word.starts_with(KEYVALUE_SEPARATOR)
                && words
                    .last()
                    .is_some_and(|last| !last.contains(KEYVALUE_SEPARATOR)));
        join_next = word.ends_with(KEYVALUE_SEPARATOR);
        if joins && let Some(last) = words.last_mut() {
            last.push_str(word);
        } else {
            words.push(word.to_string());
        }
    }

    let mut terms = Vec::with_capacity(words.len());
    for word in &words {
        match SearchTerm::parse(word) {
            ParsedTerm::Term(term) => terms.push(term),
            ParsedTerm::Separators => {}
            ParsedTerm::Unmatchable => return None,
        }
    }
    Some(terms)
}

impl MetadataStore {
    /// Search `namespace` (plus the system namespace) for entries matching
    /// `query`, keeping entities of the given kinds. An empty target list
    /// keeps every kind.
    ///
    /// Every matching index row yields one entry, so an entry matched by
    /// several tokens appears several times.
    pub fn search(
        &self,
        namespace: &str,
        query: &str,
        targets: &[SearchTarget],
    ) -> MetadataResult<Vec<MetadataEntry>> {
        let terms = match parse_query(query) {
            Some(terms) if !terms.is_empty() => terms,
            _ => return Ok(Vec::new()),
        };
        let scopes = if namespace == SYSTEM_NAMESPACE {
            vec![SYSTEM_NAMESPACE]
        } else {
            vec![namespace, SYSTEM_NAMESPACE]
        };

        let read_txn = self.db.begin_read()?;
        let lookup = read_txn.open_table(tables::INDEX_LOOKUP)?;
        let metadata = read_txn.open_table(tables::METADATA)?;

        let mut per_term = Vec::with_capacity(terms.len());
        for term in &terms {
            let mut hits = Vec::new();
            for (entity, key) in term_hits(&lookup, &scopes, term)? {
                if !SearchTarget::any_matches(targets, entity.kind()) {
                    continue;
                }
                let row = codec::metadata_key(&entity, &key);
                match metadata.get(row.as_bytes())? {
                    Some(value) => hits.push(MetadataEntry::new(entity, key, value.value())),
                    None => warn!("Index row for {} {} has no metadata row", entity, key),
                }
            }
            per_term.push(hits);
        }

        let results = intersect(per_term);
        debug!(
            "Search '{}' in {} matched {} entries",
            query,
            namespace,
            results.len()
        );
        Ok(results)
    }

    /// Like [`search`](Self::search), but returns each matching entity
    /// once, in first-hit order
    pub fn search_entities(
        &self,
        namespace: &str,
        query: &str,
        targets: &[SearchTarget],
    ) -> MetadataResult<Vec<EntityId>> {
        let mut seen = HashSet::new();
        Ok(self
            .search(namespace, query, targets)?
            .into_iter()
            .map(|entry| entry.entity)
            .filter(|entity| seen.insert(entity.clone()))
            .collect())
    }
}

/// (entity, key) hits of one term: rows of the whole token, then entries
/// that every fragment hit and the whole token did not
fn term_hits(
    lookup: &impl ReadableTable<&'static [u8], ()>,
    scopes: &[&str],
    term: &SearchTerm,
) -> MetadataResult<Vec<(EntityId, String)>> {
    let mut hits = scan_scopes(lookup, scopes, &term.whole)?;
    let Some((first, rest)) = term.fragments.split_first() else {
        return Ok(hits);
    };

    let mut common = scan_scopes(lookup, scopes, first)?;
    for fragment in rest {
        let found: HashSet<(EntityId, String)> =
            scan_scopes(lookup, scopes, fragment)?.into_iter().collect();
        common.retain(|hit| found.contains(hit));
    }
    let mut seen: HashSet<(EntityId, String)> = hits.iter().cloned().collect();
    for hit in common {
        if seen.insert(hit.clone()) {
            hits.push(hit);
        }
    }
    Ok(hits)
}

fn scan_scopes(
    lookup: &impl ReadableTable<&'static [u8], ()>,
    scopes: &[&str],
    token: &TokenMatch,
) -> MetadataResult<Vec<(EntityId, String)>> {
    let mut hits = Vec::new();
    for scope in scopes {
        hits.extend(scan_token(lookup, scope, token)?);
    }
    Ok(hits)
}

/// (entity, key) of every lookup row matching `token` in `namespace`
fn scan_token(
    lookup: &impl ReadableTable<&'static [u8], ()>,
    namespace: &str,
    token: &TokenMatch,
) -> MetadataResult<Vec<(EntityId, String)>> {
    let start = if token.prefix {
        codec::lookup_prefix(namespace, &token.token)
    } else {
        codec::lookup_exact(namespace, &token.token)
    };
    let end = start.prefix_end();
    let mut hits = Vec::new();
    for row in lookup.range::<&[u8]>(codec::prefix_bounds(start.as_bytes(), end.as_deref()))? {
        let (key, _) = row?;
        match codec::decode_lookup_key(key.value()) {
            Ok(hit) => hits.push(hit),
            Err(e) => warn!("Skipping undecodable index row: {}", e),
        }
    }
    Ok(hits)
}

/// Keep the hits of entities that every term matched, in term order
fn intersect(per_term: Vec<Vec<MetadataEntry>>) -> Vec<MetadataEntry> {
    let mut qualifying: Option<HashSet<EntityId>> = None;
    for hits in &per_term {
        let entities: HashSet<EntityId> = hits.iter().map(|hit| hit.entity.clone()).collect();
        qualifying = Some(match qualifying {
            Some(previous) => previous.intersection(&entities).cloned().collect(),
            None => entities,
        });
    }
    let qualifying = qualifying.unwrap_or_default();
    per_term
        .into_iter()
        .flatten()
        .filter(|hit| qualifying.contains(&hit.entity))
        .collect()
}
