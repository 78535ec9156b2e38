//! The smart optimizer.
//!
//! Before executing a search the engine counts matches and estimates the
//! size of the full matched set. The decision tree, evaluated in order:
//!
//! 1. Estimate within budget → execute as requested.
//! 2. Restrict to the essential-fields subset → `field_reduction`.
//! 3. For an explicitly paginating caller (cursor or offset), shrink the
//!    page size down to a floor of 10 so each response stays inside the
//!    budget → `page_reduction`.
//! 4. Apply the configured fallback: substitute an aggregation summary,
//!    take a random sample, or fail with an oversized-result error.
//!
//! Steps 1 and 2 estimate the full matched set — the volume a client
//! pulling the whole result would receive. Step 3 only applies when the
//! caller opted into pagination, because a paginating client controls its
//! own volume; a one-shot query of an oversized set falls through to the
//! fallback.

use talon_config::FallbackStrategy;
use talon_core::{ServerError, ServerResult};

/// Estimated bytes for a full document.
const FULL_DOC_BYTES: u64 = 2048;

/// Estimated bytes for an essential-fields document.
const ESSENTIAL_DOC_BYTES: u64 = 320;

/// Smallest page the optimizer will shrink to.
const PAGE_FLOOR: usize = 10;

/// The fields kept by a `field_reduction`, in user-facing names.
pub(crate) const ESSENTIAL_FIELDS: &[&str] = &[
    "timestamp",
    "source_ip",
    "destination_ip",
    "destination_port",
    "event_type",
    "username",
    "session_id",
];

/// What the optimizer decided to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Plan {
    /// Run a search with the given page size; `essential_fields` replaces
    /// the caller's projection when set.
    Search {
        size: usize,
        essential_fields: bool,
        optimizations: Vec<String>,
    },
    /// Substitute an aggregation summary.
    Aggregate { optimizations: Vec<String> },
    /// Take a random sample of `size` documents.
    Sample {
        size: usize,
        optimizations: Vec<String>,
    },
}

/// Decide how to execute a search matching `matched` documents.
pub(crate) fn plan(
    matched: u64,
    requested_size: usize,
    has_projection: bool,
    caller_paginates: bool,
    max_result_bytes: u64,
    fallback: FallbackStrategy,
) -> ServerResult<Plan> {
    // A caller-provided projection already reduces width.
    let full_width = if has_projection {
        ESSENTIAL_DOC_BYTES
    } else {
        FULL_DOC_BYTES
    };

    // 1. As requested.
    if matched.saturating_mul(full_width) <= max_result_bytes {
        return Ok(Plan::Search {
            size: requested_size,
            essential_fields: false,
            optimizations: Vec::new(),
        });
    }

    // 2. Essential fields.
    if matched.saturating_mul(ESSENTIAL_DOC_BYTES) <= max_result_bytes {
        return Ok(Plan::Search {
            size: requested_size,
            essential_fields: true,
            optimizations: vec!["field_reduction".to_owned()],
        });
    }

    // 3. Page reduction, for callers that paginate anyway.
    if caller_paginates {
        let mut size = requested_size;
        while (size as u64).saturating_mul(ESSENTIAL_DOC_BYTES) > max_result_bytes
            && size > PAGE_FLOOR
        {
            size = (size / 2).max(PAGE_FLOOR);
        }
        if (size as u64).saturating_mul(ESSENTIAL_DOC_BYTES) <= max_result_bytes {
            return Ok(Plan::Search {
                size,
                essential_fields: true,
                optimizations: vec![
                    "field_reduction".to_owned(),
                    "page_reduction".to_owned(),
                ],
            });
        }
    }

    // 4. Fallback.
    match fallback {
        FallbackStrategy::Aggregate => Ok(Plan::Aggregate {
            optimizations: vec!["aggregation_fallback".to_owned()],
        }),
        FallbackStrategy::Sample => Ok(Plan::Sample {
            size: PAGE_FLOOR,
            optimizations: vec!["sampling_fallback".to_owned()],
        }),
        FallbackStrategy::Error => Err(ServerError::OversizedResult {
            estimated_bytes: matched.saturating_mul(full_width),
            max_bytes: max_result_bytes,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_small_result_runs_as_requested() {
        let plan = plan(50, 100, false, false, 10 * MIB, FallbackStrategy::Error).unwrap();
        assert_eq!(
            plan,
            Plan::Search {
                size: 100,
                essential_fields: false,
                optimizations: Vec::new(),
            }
        );
    }

    #[test]
    fn test_field_reduction_kicks_in() {
        // 1000 docs * 2048 B = 2 MiB > 1 MiB; essential fields (320 KB) fit.
        let plan = plan(1000, 100, false, false, MIB, FallbackStrategy::Error).unwrap();
        match plan {
            Plan::Search {
                essential_fields,
                optimizations,
                ..
            } => {
                assert!(essential_fields);
                assert_eq!(optimizations, vec!["field_reduction"]);
            },
            other => panic!("expected search plan, got {other:?}"),
        }
    }

    #[test]
    fn test_page_reduction_for_paginating_caller() {
        // 100k docs exceed the budget even with essential fields; a
        // paginating caller gets a shrunken page instead of a fallback.
        let plan = plan(100_000, 1000, false, true, MIB, FallbackStrategy::Error).unwrap();
        match plan {
            Plan::Search {
                size,
                optimizations,
                ..
            } => {
                assert!(size <= 1000 && size >= 10);
                assert!(optimizations.contains(&"page_reduction".to_owned()));
            },
            other => panic!("expected search plan, got {other:?}"),
        }
    }

    #[test]
    fn test_oneshot_oversized_errors() {
        let err = plan(100_000, 1000, false, false, MIB, FallbackStrategy::Error).unwrap_err();
        assert_eq!(err.data()["kind"], "oversized_result");
    }

    #[test]
    fn test_fallback_aggregate() {
        let plan = plan(100_000, 1000, false, false, MIB, FallbackStrategy::Aggregate).unwrap();
        assert!(matches!(plan, Plan::Aggregate { .. }));
    }

    #[test]
    fn test_fallback_sample() {
        let plan = plan(100_000, 1000, false, false, MIB, FallbackStrategy::Sample).unwrap();
        assert!(matches!(plan, Plan::Sample { size: 10, .. }));
    }
}
