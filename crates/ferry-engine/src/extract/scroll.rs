//! Scrolled search over a remote index.

use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::Value;

use ferry_types::error::MigrationError;

use crate::retry::RetryPolicy;
use crate::service::{SearchClient, SearchHit, SearchPage};

/// Iterator over every hit of a scrolled query.
///
/// The first request opens a cursor; follow-up requests continue it until a
/// page comes back empty. Each request runs under the retry policy and an
/// exhausted budget ends the sequence with that error. The cursor is
/// cleared when the results run out, after a failure, and on drop.
pub struct ScrollSearch {
    client: Arc<dyn SearchClient>,
    index: String,
    query: Value,
    page_size: u32,
    keep_alive: String,
    retry: RetryPolicy,
    scroll_id: Option<String>,
    buffer: VecDeque<SearchHit>,
    started: bool,
    done: bool,
    pages: u64,
}

impl ScrollSearch {
    pub fn new(
        client: Arc<dyn SearchClient>,
        index: impl Into<String>,
        query: Value,
        page_size: u32,
        keep_alive: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            index: index.into(),
            query,
            page_size,
            keep_alive: keep_alive.into(),
            retry,
            scroll_id: None,
            buffer: VecDeque::new(),
            started: false,
            done: false,
            pages: 0,
        }
    }

    #[must_use]
    pub fn index(&self) -> &str {
        &self.index
    }

    fn fetch(&mut self) -> Result<SearchPage, MigrationError> {
        let client = &self.client;
        match (&self.scroll_id, self.started) {
            (Some(scroll_id), true) => self.retry.run("scroll", || {
                client.scroll(scroll_id, &self.keep_alive)
            }),
            (None, true) => Ok(SearchPage::default()),
            (_, false) => {
                self.started = true;
                let (index, query, size, keep_alive) =
                    (&self.index, &self.query, self.page_size, &self.keep_alive);
                self.retry
                    .run("search", || client.search(index, query, size, keep_alive))
            }
        }
    }

    fn release(&mut self) {
        let Some(scroll_id) = self.scroll_id.take() else {
            return;
        };
        match self.client.clear_scroll(&scroll_id) {
            Ok(()) => tracing::debug!(index = self.index.as_str(), pages = self.pages, "Cleared scroll"),
            Err(e) => tracing::warn!(index = self.index.as_str(), error = %e, "Failed to clear scroll"),
        }
    }
}

impl Iterator for ScrollSearch {
    type Item = Result<SearchHit, MigrationError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(hit) = self.buffer.pop_front() {
                return Some(Ok(hit));
            }
            if self.done {
                return None;
            }

            match self.fetch() {
                Ok(page) => {
                    if page.scroll_id.is_some() {
                        self.scroll_id = page.scroll_id;
                    }
                    if page.hits.is_empty() {
                        self.done = true;
                        self.release();
                        return None;
                    }
                    self.pages += 1;
                    self.buffer.extend(page.hits);
                }
                Err(err) => {
                    self.done = true;
                    self.release();
                    return Some(Err(err));
                }
            }
        }
    }
}

impl Drop for ScrollSearch {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSearch;
    use ferry_types::error::ErrorScope;
    use serde_json::json;
    use std::time::Duration;

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::ZERO)
    }

    fn seeded(count: usize) -> Arc<FakeSearch> {
        let fake = Arc::new(FakeSearch::default());
        for i in 0..count {
            fake.insert("legacy", &i.to_string(), json!({"recid": i}));
        }
        fake
    }

    #[test]
    fn pages_through_all_hits_and_clears_cursor() {
        let fake = seeded(7);
        let hits: Vec<_> = ScrollSearch::new(fake.clone(), "legacy", json!({"match_all": {}}), 3, "1m", policy(3))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(hits.len(), 7);
        assert_eq!(fake.open_scrolls(), 0);
        assert_eq!(fake.search_calls(), 1);
        assert_eq!(fake.scroll_calls(), 3);
    }

    #[test]
    fn transient_failures_below_budget_are_retried() {
        let fake = seeded(4);
        fake.fail_next_requests(9);
        let hits: Vec<_> = ScrollSearch::new(fake.clone(), "legacy", json!({"match_all": {}}), 2, "1m", policy(10))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(hits.len(), 4);
        assert_eq!(fake.open_scrolls(), 0);
    }

    #[test]
    fn exhausted_budget_raises_once_and_clears_cursor() {
        let fake = seeded(4);
        let mut scroll = ScrollSearch::new(fake.clone(), "legacy", json!({"match_all": {}}), 2, "1m", policy(3));
        assert!(scroll.next().unwrap().is_ok());
        assert!(scroll.next().unwrap().is_ok());
        fake.fail_next_requests(3);
        let err = scroll.next().unwrap().unwrap_err();
        assert_eq!(err.scope, ErrorScope::Collection);
        assert!(!err.retryable);
        assert!(scroll.next().is_none());
        assert_eq!(fake.open_scrolls(), 0);
    }

    #[test]
    fn dropping_mid_scroll_releases_cursor() {
        let fake = seeded(10);
        {
            let mut scroll = ScrollSearch::new(fake.clone(), "legacy", json!({"match_all": {}}), 2, "1m", policy(1));
            assert!(scroll.next().is_some());
            assert_eq!(fake.open_scrolls(), 1);
        }
        assert_eq!(fake.open_scrolls(), 0);
    }

    #[test]
    fn empty_index_yields_nothing() {
        let fake = Arc::new(FakeSearch::default());
        let mut scroll = ScrollSearch::new(fake.clone(), "legacy", json!({"match_all": {}}), 5, "1m", policy(1));
        assert!(scroll.next().is_none());
        assert_eq!(fake.open_scrolls(), 0);
    }
}
