//! Pull-based pagination over resource service pages.
//!
//! A [`PageCursor`] starts with its first page already fetched. Reading
//! [`first`](PageCursor::first) never touches the network; each
//! [`next`](PageCursor::next) after the buffered pages issues one GET for
//! the page named by `meta.next`, until a page arrives without one.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::Stream;
use url::Url;

use crate::completeness::RetrySpec;
use crate::correlation::CorrelationId;
use crate::error::SdkError;
use crate::executor::{RequestExecutor, RequestTemplate};
use crate::linked::LinkedCursor;
use crate::page::Page;

/// Issues the GETs of one browse operation.
///
/// Every page of the operation, linked pages included, reuses the same
/// correlation id and retry spec.
#[derive(Debug)]
pub struct PageFetcher {
    executor: RequestExecutor,
    location: Url,
    owner: Option<String>,
    correlation: CorrelationId,
    retry_spec: Option<RetrySpec>,
}

impl PageFetcher {
    pub(crate) fn new(
        executor: RequestExecutor,
        location: Url,
        owner: Option<String>,
        correlation: CorrelationId,
        retry_spec: Option<RetrySpec>,
    ) -> Self {
        Self {
            executor,
            location,
            owner,
            correlation,
            retry_spec,
        }
    }

    /// `<location>/data/<resource>`, with `query` appended verbatim.
    pub(crate) fn data_url(&self, resource: &str, query: Option<&str>) -> Result<Url, SdkError> {
        let mut url = join_location(&self.location, &format!("/data/{resource}"))?;
        url.set_query(query.filter(|q| !q.is_empty()));
        Ok(url)
    }

    /// URL of the page following `page`, if the service announced one.
    pub(crate) fn next_url(&self, page: &Page) -> Result<Option<Url>, SdkError> {
        page.continuation()
            .map(|next| join_location(&self.location, next))
            .transpose()
    }

    pub(crate) async fn fetch(&self, url: Url, resource: &str) -> Result<Page, SdkError> {
        self.fetch_with(url, resource, self.retry_spec.clone()).await
    }

    /// Fetch a page of the `name` inclusion from its own endpoint.
    pub(crate) async fn fetch_linked(&self, url: Url, name: &str) -> Result<Page, SdkError> {
        let spec = self
            .retry_spec
            .as_ref()
            .and_then(|spec| spec.for_inclusion(name));
        self.fetch_with(url, name, spec).await
    }

    async fn fetch_with(
        &self,
        mut url: Url,
        resource: &str,
        spec: Option<RetrySpec>,
    ) -> Result<Page, SdkError> {
        if let Some(owner) = &self.owner {
            with_owner(&mut url, owner);
        }
        let request = RequestTemplate::get(url)
            .with_resource_name(resource)
            .with_retry_spec(spec);
        self.executor.execute(&request, &self.correlation).await
    }
}

/// Lazily paginated browse results.
#[derive(Debug)]
pub struct PageCursor {
    fetcher: Arc<PageFetcher>,
    resource: String,
    first: Page,
    first_next: Option<Url>,
    buffered: VecDeque<Page>,
    next_url: Option<Url>,
}

impl PageCursor {
    /// Fetch `url` and up to `prefetch_pages - 1` following pages.
    ///
    /// Prefetching stops early at the last page. At least the first page is
    /// always fetched.
    pub(crate) async fn open(
        fetcher: Arc<PageFetcher>,
        resource: String,
        url: Url,
        prefetch_pages: usize,
    ) -> Result<Self, SdkError> {
        let first = fetcher.fetch(url, &resource).await?;
        let first_next = fetcher.next_url(&first)?;

        let mut cursor = Self {
            fetcher,
            resource,
            buffered: VecDeque::from([first.clone()]),
            next_url: first_next.clone(),
            first,
            first_next,
        };
        for _ in 1..prefetch_pages.max(1) {
            match cursor.fetch_next().await? {
                Some(page) => cursor.buffered.push_back(page),
                None => break,
            }
        }
        tracing::debug!(
            resource = %cursor.resource,
            buffered = cursor.buffered.len(),
            more = cursor.next_url.is_some(),
            "browse opened"
        );
        Ok(cursor)
    }

    /// The first page, without advancing or fetching anything.
    #[must_use]
    pub fn first(&self) -> &Page {
        &self.first
    }

    #[must_use]
    pub fn into_first(self) -> Page {
        self.first
    }

    #[must_use]
    pub fn resource_name(&self) -> &str {
        &self.resource
    }

    /// Whether [`next`](Self::next) can yield another page.
    #[must_use]
    pub fn has_next(&self) -> bool {
        !self.buffered.is_empty() || self.next_url.is_some()
    }

    /// The next page, `Ok(None)` once exhausted.
    ///
    /// A failed fetch ends the cursor; later calls return `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Any [`SdkError`] from the page request.
    pub async fn next(&mut self) -> Result<Option<Page>, SdkError> {
        if let Some(page) = self.buffered.pop_front() {
            return Ok(Some(page));
        }
        self.fetch_next().await
    }

    /// Rewind to the first page. Pages after it are fetched again.
    pub fn restart(&mut self) {
        self.buffered = VecDeque::from([self.first.clone()]);
        self.next_url.clone_from(&self.first_next);
    }

    /// Cursor over the inclusion `name`, starting from the first page.
    ///
    /// The returned cursor keeps its own position in the primary pages;
    /// advancing either cursor leaves the other untouched.
    ///
    /// # Errors
    ///
    /// [`SdkError::InvalidUrl`] if a linked `next` link cannot be resolved.
    pub fn linked(&self, name: &str) -> Result<LinkedCursor, SdkError> {
        LinkedCursor::new(
            Arc::clone(&self.fetcher),
            self.resource.clone(),
            name.to_owned(),
            &self.first,
        )
    }

    /// Adapt into a [`Stream`] of pages that ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Page, SdkError>> + Send {
        futures::stream::unfold(self, |mut cursor| async move {
            cursor.next().await.transpose().map(|item| (item, cursor))
        })
    }

    async fn fetch_next(&mut self) -> Result<Option<Page>, SdkError> {
        let Some(url) = self.next_url.take() else {
            return Ok(None);
        };
        let page = self.fetcher.fetch(url, &self.resource).await?;
        self.next_url = self.fetcher.next_url(&page)?;
        Ok(Some(page))
    }
}

/// Append `path` (absolute path, optionally with a query) to a service
/// location, which may or may not end with `/`.
pub fn join_location(location: &Url, path: &str) -> Result<Url, SdkError> {
    let joined = format!("{}{path}", location.as_str().trim_end_matches('/'));
    Url::parse(&joined).map_err(|e| SdkError::invalid_url(joined, e.to_string()))
}

/// Add `owner=<owner>` unless the URL already names an owner.
pub fn with_owner(url: &mut Url, owner: &str) {
    if !url.query_pairs().any(|(key, _)| key == "owner") {
        url.query_pairs_mut().append_pair("owner", owner);
    }
}
