//! Carrier code resolution
//!
//! Callers pass whatever carrier code and name they have. Each provider knows
//! its own code set; [`resolve`] maps the request onto it:
//!
//! 1. a code already in the catalog is kept as-is
//! 2. an exact carrier-name match in the manual overrides wins next
//! 3. otherwise the catalog entry with the smallest combined edit distance
//!    (code distance + name distance) is substituted
//!
//! Ties in step 3 go to the entry that comes first in catalog order, which
//! is the order the adapter returned its code list in.

use std::collections::HashSet;

use crate::config::CodeOverride;
use crate::model::{CarrierCode, QueryParam};

/// A provider's known carrier codes
#[derive(Debug, Clone, Default)]
pub struct CodeCatalog {
    entries: Vec<CarrierCode>,
    codes: HashSet<String>,
}

impl CodeCatalog {
    /// Build a catalog from an adapter's code list
    pub fn new(entries: Vec<CarrierCode>) -> Self {
        let codes = entries.iter().map(|entry| entry.code.clone()).collect();
        Self { entries, codes }
    }

    /// Whether `code` is known
    pub fn contains(&self, code: &str) -> bool {
        self.codes.contains(code)
    }

    /// Entries in load order
    pub fn entries(&self) -> &[CarrierCode] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Map a request onto the catalog's code set
pub fn resolve(catalog: &CodeCatalog, overrides: &[CodeOverride], param: &QueryParam) -> QueryParam {
    if catalog.contains(&param.code) {
        return param.clone();
    }

    if let Some(manual) = overrides.iter().find(|entry| entry.company == param.company) {
        return QueryParam {
            code: manual.code.clone(),
            ..param.clone()
        };
    }

    let closest = catalog.entries().iter().min_by_key(|entry| {
        edit_distance(&entry.code, &param.code) + edit_distance(&entry.company, &param.company)
    });

    match closest {
        Some(entry) => QueryParam {
            code: entry.code.clone(),
            company: entry.company.clone(),
            ..param.clone()
        },
        None => param.clone(),
    }
}

/// Damerau-Levenshtein distance (optimal string alignment variant)
///
/// Counts insertions, deletions, substitutions and transpositions of adjacent
/// characters, over Unicode scalar values.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let width = b.len() + 1;
    // Three rolling rows: two back, previous, current.
    let mut before = vec![0usize; width];
    let mut previous: Vec<usize> = (0..width).collect();
    let mut current = vec![0usize; width];

    for i in 1..=a.len() {
        current[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            let mut best = (previous[j] + 1)
                .min(current[j - 1] + 1)
                .min(previous[j - 1] + cost);
            if i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                best = best.min(before[j - 2] + 1);
            }
            current[j] = best;
        }
        std::mem::swap(&mut before, &mut previous);
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}
