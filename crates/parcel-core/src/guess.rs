//! Delivery inference from free-text status lines
//!
//! Many carriers keep reporting "in transit" after the parcel has been signed
//! for. [`SignRules`] holds per-carrier regexes compiled from
//! [`SignTemplate`]s and decides whether the latest status line reads as a
//! delivery. Lines younger than [`RECENCY_GUARD_HOURS`] are never trusted.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;

use crate::config::SignTemplate;
use crate::error::Result;
use crate::model::ProcessEvent;

/// Minimum age of the latest status line before it can imply delivery
pub const RECENCY_GUARD_HOURS: i64 = 24;

/// Compiled sign templates keyed by carrier code
#[derive(Debug, Clone, Default)]
pub struct SignRules {
    rules: HashMap<String, Vec<Regex>>,
}

impl SignRules {
    /// Compile templates; any invalid pattern fails the whole set
    pub fn compile(templates: &[SignTemplate]) -> Result<Self> {
        let mut rules: HashMap<String, Vec<Regex>> = HashMap::new();
        for template in templates {
            let compiled = template
                .patterns
                .iter()
                .map(|pattern| Regex::new(pattern))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rules
                .entry(template.code.clone())
                .or_default()
                .extend(compiled);
        }
        Ok(Self { rules })
    }

    /// Whether any rules exist for `code`
    pub fn covers(&self, code: &str) -> bool {
        self.rules.get(code).is_some_and(|patterns| !patterns.is_empty())
    }

    /// Infer delivery from `process` (most recent first) for carrier `code`
    pub fn guess(&self, process: &[ProcessEvent], code: &str, now: DateTime<Utc>) -> bool {
        let Some(latest) = process.first() else {
            return false;
        };

        if now.signed_duration_since(latest.time) < Duration::hours(RECENCY_GUARD_HOURS) {
            return false;
        }

        self.rules
            .get(code)
            .is_some_and(|patterns| patterns.iter().any(|re| re.is_match(&latest.content)))
    }
}
