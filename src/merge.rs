use std::collections::BTreeMap;

use crate::data::model::{CadenceRange, TimeSeries};
use crate::error::{Result, ValidationError};

/// Combine two optional pieces of one series. An absent side yields the
/// other; otherwise `existing` comes first.
pub fn merge<S: TimeSeries>(existing: Option<S>, incoming: Option<S>) -> Option<S> {
    match (existing, incoming) {
        (None, incoming) => incoming,
        (existing, None) => existing,
        (Some(existing), Some(incoming)) => Some(existing.concat(incoming)),
    }
}

// ---------------------------------------------------------------------------
// WindowedSeries – per-entity fragments keyed by window start
// ---------------------------------------------------------------------------

/// Collects series fragments per entity in whatever order fragments are
/// visited, then stitches each entity's pieces in cadence order.
#[derive(Debug, Clone)]
pub struct WindowedSeries<K, S> {
    pieces: BTreeMap<K, BTreeMap<i32, (CadenceRange, S)>>,
}

impl<K, S> Default for WindowedSeries<K, S> {
    fn default() -> Self {
        WindowedSeries {
            pieces: BTreeMap::new(),
        }
    }
}

impl<K, S> WindowedSeries<K, S>
where
    K: Ord + Clone + std::fmt::Display,
    S: TimeSeries,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the piece of `key` covering `window`. A second piece for the
    /// same window replaces the first.
    pub fn insert(&mut self, key: K, window: CadenceRange, series: S) {
        let previous = self
            .pieces
            .entry(key.clone())
            .or_default()
            .insert(window.start(), (window, series));
        if previous.is_some() {
            log::warn!("{key}: duplicate fragment for window {window}, keeping the last one");
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.pieces.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.pieces.keys()
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    /// Concatenate every entity's pieces in ascending window order. Fails if
    /// the windows of an entity leave a hole or overlap, or a piece does not
    /// match its window's length.
    pub fn into_merged(self) -> Result<BTreeMap<K, (CadenceRange, S)>> {
        let mut merged = BTreeMap::new();
        for (key, pieces) in self.pieces {
            let mut span: Option<CadenceRange> = None;
            let mut series: Option<S> = None;
            for (window, piece) in pieces.into_values() {
                if piece.len() != window.len() {
                    return Err(ValidationError::execution(format!(
                        "{key}: {} samples for window {window}",
                        piece.len()
                    )));
                }
                if let Some(covered) = span {
                    if window.start() != covered.end() + 1 {
                        return Err(ValidationError::execution(format!(
                            "{key}: window {window} does not follow {covered}"
                        )));
                    }
                }
                span = Some(span.map_or(window, |covered| covered.union(&window)));
                series = merge(series, Some(piece));
            }
            if let (Some(span), Some(series)) = (span, series) {
                merged.insert(key, (span, series));
            }
        }
        Ok(merged)
    }
}

// ---------------------------------------------------------------------------
// Coverage – union of visited windows
// ---------------------------------------------------------------------------

/// Smallest range covering every window seen so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Coverage {
    range: Option<CadenceRange>,
}

impl Coverage {
    pub fn add(&mut self, window: CadenceRange) {
        self.range = Some(match self.range {
            Some(range) => range.union(&window),
            None => window,
        });
    }

    pub fn range(&self) -> Option<CadenceRange> {
        self.range
    }
}
