use crate::ast::Expression;
use crate::error::SyntaxError;
use crate::parser::{EntryPoint, ParseFlags, Parsed};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Everything that determines the shape of a parse result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub text: String,
    pub entry: EntryPoint,
    pub flags: ParseFlags,
}

#[derive(Debug)]
struct CacheEntry {
    expression: Expression,
    macros_used: Vec<String>,
    macro_generation: u64,
}

impl CacheEntry {
    fn is_stale(&self, generation: u64) -> bool {
        !self.macros_used.is_empty() && self.macro_generation != generation
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    /// Percentage of lookups served from the cache.
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64 * 100.0
        }
    }
}

/// Concurrent memo of successful parses.
///
/// Entries are never handed out directly: every lookup returns a deep copy,
/// so callers own their tree outright. Failed parses are not stored.
pub struct ParseCache {
    entries: DashMap<CacheKey, Arc<CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    max_entries: Option<usize>,
}

impl ParseCache {
    pub fn new() -> Self {
        Self::with_limit(None)
    }

    /// Once `max_entries` results are stored, new results are returned
    /// without being cached.
    pub fn with_limit(max_entries: Option<usize>) -> Self {
        Self {
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            max_entries,
        }
    }

    /// Returns a copy of the cached tree for `key`, or runs `parse` and
    /// stores its result. `generation` is the current macro registry
    /// generation; entries built with older macros are re-parsed.
    ///
    /// `parse` runs without any lock held. When two callers race on the same
    /// key the first stored result wins and both get a copy of it.
    pub fn get_or_parse<F>(&self, key: CacheKey, generation: u64, parse: F) -> Result<Expression, SyntaxError>
    where
        F: FnOnce() -> Result<Parsed, SyntaxError>,
    {
        if let Some(found) = self.lookup(&key, generation) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            log::trace!("parse cache hit for {} '{}'", key.entry, key.text);
            return Ok(found);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        log::trace!("parse cache miss for {} '{}'", key.entry, key.text);

        let parsed = parse()?;
        if !parsed.cacheable {
            log::debug!("not caching '{}': uses a non-cacheable macro", key.text);
            return Ok(parsed.expression);
        }
        if let Some(limit) = self.max_entries {
            if self.entries.len() >= limit && !self.entries.contains_key(&key) {
                log::debug!("parse cache full ({} entries), skipping '{}'", limit, key.text);
                return Ok(parsed.expression);
            }
        }

        let fresh = Arc::new(CacheEntry {
            expression: parsed.expression,
            macros_used: parsed.macros_used,
            macro_generation: generation,
        });
        let stored = match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_stale(generation) {
                    occupied.insert(Arc::clone(&fresh));
                }
                Arc::clone(occupied.get())
            }
            Entry::Vacant(vacant) => Arc::clone(vacant.insert(fresh).value()),
        };
        Ok(stored.expression.clone())
    }

    fn lookup(&self, key: &CacheKey, generation: u64) -> Option<Expression> {
        let entry = Arc::clone(self.entries.get(key)?.value());
        if entry.is_stale(generation) {
            log::debug!("dropping stale cache entry for '{}' (macros {:?} changed)", key.text, entry.macros_used);
            self.entries.remove_if(key, |_, current| Arc::ptr_eq(current, &entry));
            return None;
        }
        Some(entry.expression.clone())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry and resets the counters.
    pub fn clear(&self) {
        self.entries.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

impl Default for ParseCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expression;

    fn key(text: &str) -> CacheKey {
        CacheKey { text: text.to_string(), entry: EntryPoint::Simple, flags: ParseFlags::default() }
    }

    fn parse(text: &str) -> Result<Parsed, SyntaxError> {
        parse_expression(text, EntryPoint::Simple, ParseFlags::default()).map(|expression| Parsed {
            expression,
            macros_used: vec![],
            cacheable: true,
        })
    }

    #[test]
    fn hits_return_equal_copies() {
        let cache = ParseCache::new();
        let first = cache.get_or_parse(key("a.b + 1"), 0, || parse("a.b + 1")).unwrap();
        let second = cache
            .get_or_parse(key("a.b + 1"), 0, || panic!("should be served from cache"))
            .unwrap();
        assert_eq!(first, second);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
        assert_eq!(stats.hit_rate(), 50.0);
    }

    #[test]
    fn errors_are_not_cached() {
        let cache = ParseCache::new();
        assert!(cache.get_or_parse(key("a +"), 0, || parse("a +")).is_err());
        assert!(cache.is_empty());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn limit_stops_insertion() {
        let cache = ParseCache::with_limit(Some(1));
        cache.get_or_parse(key("a"), 0, || parse("a")).unwrap();
        cache.get_or_parse(key("b"), 0, || parse("b")).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn macro_entries_expire_with_generation() {
        let cache = ParseCache::new();
        let with_macro = || {
            parse("a").map(|mut p| {
                p.macros_used = vec!["M".to_string()];
                p
            })
        };
        cache.get_or_parse(key("M(a)"), 1, with_macro).unwrap();
        cache.get_or_parse(key("M(a)"), 1, || panic!("fresh entry")).unwrap();
        cache.get_or_parse(key("M(a)"), 2, with_macro).unwrap();
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 2));
    }
}
