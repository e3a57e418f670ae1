use std::collections::VecDeque;
use std::sync::Arc;

use futures::Stream;
use serde_json::Value;
use url::Url;

use crate::cursor::PageFetcher;
use crate::error::SdkError;
use crate::page::Page;

/// Batches of one inclusion across every page of a browse.
///
/// For each primary page the cursor yields, in order:
///
/// 1. the resources embedded under `linked.<name>` (skipped when empty),
/// 2. every further page of each `meta.linked.<name>[].next` link,
///
/// and then moves to the next primary page. The primary position is a
/// private copy; the [`PageCursor`](crate::PageCursor) it came from is
/// never advanced.
#[derive(Debug)]
pub struct LinkedCursor {
    fetcher: Arc<PageFetcher>,
    resource: String,
    name: String,
    embedded: Option<Vec<Value>>,
    links: VecDeque<Url>,
    linked_next: Option<Url>,
    main_next: Option<Url>,
}

impl LinkedCursor {
    pub(crate) fn new(
        fetcher: Arc<PageFetcher>,
        resource: String,
        name: String,
        first: &Page,
    ) -> Result<Self, SdkError> {
        let mut cursor = Self {
            fetcher,
            resource,
            name,
            embedded: None,
            links: VecDeque::new(),
            linked_next: None,
            main_next: None,
        };
        cursor.load(first)?;
        Ok(cursor)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether more batches may follow.
    ///
    /// `true` can still be followed by `Ok(None)` when the remaining pages
    /// turn out to carry no resources of this inclusion.
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.embedded.is_some()
            || self.linked_next.is_some()
            || !self.links.is_empty()
            || self.main_next.is_some()
    }

    /// The next non-empty batch of linked resources.
    ///
    /// # Errors
    ///
    /// Any [`SdkError`] from a page request; the cursor is exhausted
    /// afterwards.
    pub async fn next(&mut self) -> Result<Option<Vec<Value>>, SdkError> {
        let result = self.advance().await;
        if result.is_err() {
            self.clear();
        }
        result
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<Value>, SdkError>> + Send {
        futures::stream::unfold(self, |mut cursor| async move {
            cursor.next().await.transpose().map(|item| (item, cursor))
        })
    }

    async fn advance(&mut self) -> Result<Option<Vec<Value>>, SdkError> {
        loop {
            if let Some(batch) = self.embedded.take() {
                return Ok(Some(batch));
            }

            if let Some(url) = self.linked_next.take().or_else(|| self.links.pop_front()) {
                let page = self.fetcher.fetch_linked(url, &self.name).await?;
                self.linked_next = self.fetcher.next_url(&page)?;
                if !page.resources().is_empty() {
                    return Ok(Some(page.resources().to_vec()));
                }
                continue;
            }

            let Some(url) = self.main_next.take() else {
                return Ok(None);
            };
            let page = self.fetcher.fetch(url, &self.resource).await?;
            self.load(&page)?;
        }
    }

    /// Queue what primary `page` holds for this inclusion.
    fn load(&mut self, page: &Page) -> Result<(), SdkError> {
        let embedded = page.linked_resources(&self.name);
        self.embedded = (!embedded.is_empty()).then(|| embedded.to_vec());

        let links = page
            .linked_next_links(&self.name)
            .into_iter()
            .map(|link| {
                let query = link.split_once('?').map(|(_, query)| query);
                self.fetcher.data_url(&self.name, query)
            })
            .collect::<Result<VecDeque<_>, _>>()?;
        tracing::trace!(
            inclusion = %self.name,
            embedded = embedded.len(),
            links = links.len(),
            "linked page loaded"
        );

        self.links = links;
        self.main_next = self.fetcher.next_url(page)?;
        Ok(())
    }

    fn clear(&mut self) {
        self.embedded = None;
        self.links.clear();
        self.linked_next = None;
        self.main_next = None;
    }
}
