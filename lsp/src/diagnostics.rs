//! Diagnostics store: the latest published diagnostics per document.

use std::collections::HashMap;

use crate::types::{Diagnostic, DiagnosticsSnapshot, SeverityCounts};

#[derive(Debug, Default)]
pub struct DiagnosticsStore {
    data: HashMap<String, Vec<Diagnostic>>,
}

impl DiagnosticsStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the set for `uri`. An empty set forgets the document.
    pub fn update(&mut self, uri: impl Into<String>, items: Vec<Diagnostic>) {
        let uri = uri.into();
        if items.is_empty() {
            self.data.remove(&uri);
        } else {
            self.data.insert(uri, items);
        }
    }

    #[must_use]
    pub fn get(&self, uri: &str) -> Option<&[Diagnostic]> {
        self.data.get(uri).map(Vec::as_slice)
    }

    /// The most severe diagnostic starting on `line`; the first one wins ties.
    #[must_use]
    pub fn severest_for_line(&self, uri: &str, line: u32) -> Option<&Diagnostic> {
        self.data
            .get(uri)?
            .iter()
            .filter(|d| d.line() == line)
            .min_by_key(|d| d.severity())
    }

    #[must_use]
    pub fn counts_by_severity(&self) -> SeverityCounts {
        let mut counts = SeverityCounts::default();
        for diag in self.data.values().flatten() {
            counts.add(diag.severity());
        }
        counts
    }

    pub fn clear(&mut self, uri: &str) {
        self.data.remove(uri);
    }

    pub fn clear_all(&mut self) {
        self.data.clear();
    }

    #[must_use]
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let mut files: Vec<(String, Vec<Diagnostic>)> = self
            .data
            .iter()
            .map(|(uri, items)| (uri.clone(), items.clone()))
            .collect();

        // Files with errors first, then by URI
        files.sort_by(|a, b| {
            let a_has_errors = a.1.iter().any(|d| d.severity().is_error());
            let b_has_errors = b.1.iter().any(|d| d.severity().is_error());
            b_has_errors.cmp(&a_has_errors).then_with(|| a.0.cmp(&b.0))
        });

        DiagnosticsSnapshot::new(files)
    }
}
