//! One page of extracted source records.

/// Ordered records produced by a single extractor call, plus pagination state.
///
/// Never persisted; the runner copies `has_next_page`/`next_page` onto the
/// tracker once every record has been handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedBatch<R> {
    pub records: Vec<R>,
    pub has_next_page: bool,
    pub next_page: Option<String>,
}

impl<R> ExtractedBatch<R> {
    /// A final page with no continuation.
    #[must_use]
    pub fn last(records: Vec<R>) -> Self {
        Self {
            records,
            has_next_page: false,
            next_page: None,
        }
    }

    /// A page followed by more data reachable through `cursor`.
    #[must_use]
    pub fn with_next(records: Vec<R>, cursor: impl Into<String>) -> Self {
        Self {
            records,
            has_next_page: true,
            next_page: Some(cursor.into()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_page_has_no_cursor() {
        let batch = ExtractedBatch::last(vec![1, 2, 3]);
        assert!(!batch.has_next_page);
        assert!(batch.next_page.is_none());
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn with_next_sets_cursor() {
        let batch: ExtractedBatch<u8> = ExtractedBatch::with_next(vec![], "cursor-2");
        assert!(batch.has_next_page);
        assert_eq!(batch.next_page.as_deref(), Some("cursor-2"));
        assert!(batch.is_empty());
    }
}
