//! Operations on one resource collection, and on free-form business paths.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use http::header::IF_MATCH;
use http::{HeaderValue, Method, StatusCode};
use serde_json::Value;
use url::Url;

use crate::client::Shared;
use crate::completeness::RetrySpec;
use crate::cursor::{PageCursor, PageFetcher, join_location, with_owner};
use crate::error::SdkError;
use crate::executor::RequestTemplate;
use crate::page::Page;

const PRECONDITION_FAILED: &str = "Precondition Failed";
const VERSION_MISMATCH: &str = "document cannot be changed - versions do not match";

/// Options for [`ResourceEndpoint::browse`].
#[derive(Debug, Clone)]
pub struct BrowseOptions {
    /// Query parameters, typically rendered by a criteria builder.
    pub criteria: Vec<(String, String)>,
    /// Sent as `fields=<sorted, comma-joined>`.
    pub fields: Vec<String>,
    /// Raw query string appended to the collection URL as-is.
    pub query_string: Option<String>,
    /// Pages fetched before `browse` returns; at least one.
    pub prefetch_pages: usize,
    /// Replaces the endpoint's retry spec for this browse.
    pub retry_spec: Option<RetrySpec>,
}

impl Default for BrowseOptions {
    fn default() -> Self {
        Self {
            criteria: Vec::new(),
            fields: Vec::new(),
            query_string: None,
            prefetch_pages: 1,
            retry_spec: None,
        }
    }
}

impl BrowseOptions {
    #[must_use]
    pub fn criterion(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.criteria.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn query_string(mut self, query: impl Into<String>) -> Self {
        self.query_string = Some(query.into());
        self
    }

    #[must_use]
    pub fn prefetch_pages(mut self, pages: usize) -> Self {
        self.prefetch_pages = pages;
        self
    }

    #[must_use]
    pub fn retry_spec(mut self, spec: RetrySpec) -> Self {
        self.retry_spec = Some(spec);
        self
    }
}

/// `<location>/data/<resource>` of one service.
#[derive(Debug, Clone)]
pub struct ResourceEndpoint {
    shared: Arc<Shared>,
    location: Url,
    resource: String,
    url: Url,
    retry_spec: Option<RetrySpec>,
}

impl ResourceEndpoint {
    pub(crate) fn new(shared: Arc<Shared>, location: Url, resource: &str) -> Result<Self, SdkError> {
        let url = join_location(&location, &format!("/data/{resource}"))?;
        let retry_spec = shared.retry_spec.clone();
        Ok(Self {
            shared,
            location,
            resource: resource.to_owned(),
            url,
            retry_spec,
        })
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Retry spec for every call on this endpoint, replacing the client's.
    #[must_use]
    pub fn with_retry_spec(mut self, spec: Option<RetrySpec>) -> Self {
        self.retry_spec = spec;
        self
    }

    /// `GET <url>/<ref>?owner=<owner>`.
    ///
    /// # Errors
    ///
    /// See [`RequestExecutor::execute`](crate::RequestExecutor::execute).
    pub async fn read(&self, owner: &str, reference: &str) -> Result<Page, SdkError> {
        let url = self.item_url(reference, owner)?;
        self.execute(RequestTemplate::get(url)).await
    }

    /// `POST <url>/?owner=<owner>` with `document` as the body.
    ///
    /// # Errors
    ///
    /// See [`RequestExecutor::execute`](crate::RequestExecutor::execute).
    pub async fn store(&self, owner: &str, document: &Value) -> Result<Page, SdkError> {
        let url = self.item_url("", owner)?;
        let body = serde_json::to_vec(document).map_err(|e| SdkError::Payload(e.to_string()))?;
        self.execute(RequestTemplate::new(Method::POST, url).with_body(Bytes::from(body)))
            .await
    }

    /// Browse the collection; the first `prefetch_pages` pages are fetched
    /// before this returns.
    ///
    /// # Errors
    ///
    /// Any failure fetching the prefetched pages.
    pub async fn browse(&self, owner: &str, options: BrowseOptions) -> Result<PageCursor, SdkError> {
        let mut url = self.url.clone();
        url.set_query(options.query_string.as_deref().filter(|q| !q.is_empty()));
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("owner", owner);
            for (key, value) in &options.criteria {
                query.append_pair(key, value);
            }
            if !options.fields.is_empty() {
                let mut fields = options.fields.clone();
                fields.sort();
                query.append_pair("fields", &fields.join(","));
            }
        }

        let fetcher = PageFetcher::new(
            self.shared.executor.clone(),
            self.location.clone(),
            Some(owner.to_owned()),
            self.shared.correlation.begin_operation(),
            options.retry_spec.or_else(|| self.retry_spec.clone()),
        );
        PageCursor::open(
            Arc::new(fetcher),
            self.resource.clone(),
            url,
            options.prefetch_pages,
        )
        .await
    }

    /// `DELETE <url>/<ref,ref,...>?owner=<owner>`.
    ///
    /// # Errors
    ///
    /// [`SdkError::Payload`] when `references` is empty; otherwise see
    /// [`RequestExecutor::execute`](crate::RequestExecutor::execute).
    pub async fn delete(&self, owner: &str, references: &[&str]) -> Result<Page, SdkError> {
        if references.is_empty() {
            return Err(SdkError::Payload("no reference to delete".to_owned()));
        }
        let url = self.item_url(&references.join(","), owner)?;
        self.execute(RequestTemplate::new(Method::DELETE, url)).await
    }

    /// Replace `reference` with `document`, provided the stored version is
    /// still `version`.
    ///
    /// `document` is sent unchanged. Its first resource must carry
    /// `ref == reference` and `owner:name == reference`; otherwise nothing
    /// is sent.
    ///
    /// # Errors
    ///
    /// - [`SdkError::Payload`] if `document` is not JSON or holds no resource
    /// - [`SdkError::ReferenceMismatch`] if the references disagree
    /// - [`SdkError::NotMatchingVersion`] if the service refused `version`
    pub async fn update(
        &self,
        owner: &str,
        document: &str,
        reference: &str,
        version: &str,
    ) -> Result<Page, SdkError> {
        let parsed: Value =
            serde_json::from_str(document).map_err(|e| SdkError::Payload(e.to_string()))?;
        let resource = first_resource(&parsed, &self.resource)
            .ok_or_else(|| SdkError::Payload("document holds no resource".to_owned()))?;
        validate_reference(resource, reference)?;

        let if_match = HeaderValue::from_str(&format!("\"{version}\""))
            .map_err(|_| SdkError::Payload(format!("invalid version '{version}'")))?;
        let request = RequestTemplate::new(Method::PUT, self.item_url(reference, owner)?)
            .with_body(Bytes::copy_from_slice(document.as_bytes()))
            .with_header(IF_MATCH, if_match);

        match self.execute(request).await {
            Err(SdkError::Client { status, page })
                if status == StatusCode::PRECONDITION_FAILED && is_version_mismatch(&page) =>
            {
                Err(SdkError::NotMatchingVersion { page })
            }
            other => other,
        }
    }

    fn item_url(&self, tail: &str, owner: &str) -> Result<Url, SdkError> {
        let mut url = self.url.clone();
        url.path_segments_mut()
            .map_err(|()| SdkError::invalid_url(self.url.as_str(), "cannot be a base"))?
            .push(tail);
        with_owner(&mut url, owner);
        Ok(url)
    }

    async fn execute(&self, request: RequestTemplate) -> Result<Page, SdkError> {
        let request = request
            .with_resource_name(self.resource.as_str())
            .with_retry_spec(self.retry_spec.clone());
        self.shared
            .executor
            .execute(&request, &self.shared.correlation.begin_operation())
            .await
    }
}

/// The document itself, the first element of an array, or the first element
/// of the `resource`-keyed array.
fn first_resource<'a>(document: &'a Value, resource: &str) -> Option<&'a Value> {
    match document {
        Value::Array(items) => items.first(),
        Value::Object(map) => match map.get(resource) {
            Some(Value::Array(items)) => items.first(),
            Some(item @ Value::Object(_)) => Some(item),
            _ => Some(document),
        },
        _ => None,
    }
}

fn validate_reference(resource: &Value, reference: &str) -> Result<(), SdkError> {
    let own = str_field(resource, "ref");
    if own != reference {
        return Err(SdkError::ReferenceMismatch(format!(
            "reference to update {reference} does not match the resource reference {own}"
        )));
    }

    let composed = format!(
        "{}:{}",
        str_field(resource, "owner"),
        str_field(resource, "name")
    );
    if composed != reference {
        return Err(SdkError::ReferenceMismatch(format!(
            "reference to update {reference} does not match the resource reference {composed}"
        )));
    }
    Ok(())
}

fn str_field<'a>(resource: &'a Value, name: &str) -> &'a str {
    resource.get(name).and_then(Value::as_str).unwrap_or_default()
}

fn is_version_mismatch(page: &Page) -> bool {
    let json = page.json();
    json.get("error").and_then(Value::as_str) == Some(PRECONDITION_FAILED)
        && json.get("message").and_then(Value::as_str) == Some(VERSION_MISMATCH)
}

/// A free-form path under a service location, e.g.
/// `/ingest/${owner}/${ref}${params}`.
///
/// Placeholders are `${name}` or `$name`; `$$` is a literal `$`. Unknown
/// placeholders are left in the path untouched.
#[derive(Debug, Clone)]
pub struct BusinessEndpoint {
    shared: Arc<Shared>,
    location: Url,
    template: String,
}

impl BusinessEndpoint {
    pub(crate) fn new(shared: Arc<Shared>, location: Url, template: &str) -> Self {
        Self {
            shared,
            location,
            template: template.to_owned(),
        }
    }

    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// POST `content` to the rendered path; `${params}` becomes
    /// `?<urlencoded params>`, or nothing when `params` is empty.
    ///
    /// # Errors
    ///
    /// See [`RequestExecutor::execute`](crate::RequestExecutor::execute).
    pub async fn store(
        &self,
        service: &str,
        owner: &str,
        content: &Value,
        reference: &str,
        params: &[(&str, &str)],
    ) -> Result<Page, SdkError> {
        let rendered_params = if params.is_empty() {
            String::new()
        } else {
            let mut query = url::form_urlencoded::Serializer::new(String::new());
            query.extend_pairs(params);
            format!("?{}", query.finish())
        };
        let vars = BTreeMap::from([
            ("service", service),
            ("owner", owner),
            ("ref", reference),
            ("params", rendered_params.as_str()),
        ]);
        let url = join_location(&self.location, &render_template(&self.template, &vars))?;
        let body = serde_json::to_vec(content).map_err(|e| SdkError::Payload(e.to_string()))?;
        self.execute(RequestTemplate::new(Method::POST, url).with_body(Bytes::from(body)))
            .await
    }

    /// GET the path rendered with `service` and `vars`.
    ///
    /// # Errors
    ///
    /// See [`RequestExecutor::execute`](crate::RequestExecutor::execute).
    pub async fn browse(&self, service: &str, vars: &[(&str, &str)]) -> Result<Page, SdkError> {
        let mut all: BTreeMap<&str, &str> = vars.iter().copied().collect();
        all.insert("service", service);
        let url = join_location(&self.location, &render_template(&self.template, &all))?;
        self.execute(RequestTemplate::get(url)).await
    }

    async fn execute(&self, request: RequestTemplate) -> Result<Page, SdkError> {
        let request = request.with_retry_spec(self.shared.retry_spec.clone());
        self.shared
            .executor
            .execute(&request, &self.shared.correlation.begin_operation())
            .await
    }
}

/// Substitute `$name` / `${name}` from `vars`, leaving unknown or malformed
/// placeholders as written.
fn render_template(template: &str, vars: &BTreeMap<&str, &str>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(at) = rest.find('$') {
        out.push_str(&rest[..at]);
        let after = &rest[at + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            rest = tail;
            continue;
        }

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match vars.get(name) {
            Some(value) if !name.is_empty() => {
                out.push_str(value);
                rest = &after[consumed..];
            }
            _ => {
                out.push('$');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
