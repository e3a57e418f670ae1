use std::collections::BTreeMap;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde_json::{Map, Value};
use url::Url;

/// One parsed response from a resource service.
///
/// Immutable once built. Bodies that are not JSON objects (empty bodies,
/// HTML error pages) produce an empty object so status and headers stay
/// inspectable.
#[derive(Debug, Clone)]
pub struct Page {
    status: StatusCode,
    headers: HeaderMap,
    url: Url,
    resource_name: Option<String>,
    json: Value,
    resources: Vec<Value>,
    linked: BTreeMap<String, Vec<Value>>,
    continuation: Option<String>,
}

impl Page {
    /// Parse `body` as returned by `url` for `resource_name`.
    #[must_use]
    pub fn from_response(
        status: StatusCode,
        headers: HeaderMap,
        body: &Bytes,
        url: Url,
        resource_name: Option<&str>,
    ) -> Self {
        let json = match serde_json::from_slice::<Value>(body) {
            Ok(value @ Value::Object(_)) => value,
            _ => {
                if !body.is_empty() {
                    tracing::trace!(%url, status = %status, "response body is not a JSON object");
                }
                Value::Object(Map::new())
            }
        };

        let resources = resource_name
            .map(|name| group_values(json.get(name)))
            .unwrap_or_default();

        let linked: BTreeMap<String, Vec<Value>> = json
            .get("linked")
            .or_else(|| json.get("included"))
            .and_then(Value::as_object)
            .map(|groups| {
                groups
                    .iter()
                    .map(|(name, value)| (name.clone(), group_values(Some(value))))
                    .collect()
            })
            .unwrap_or_default();

        let continuation = json
            .pointer("/meta/next")
            .and_then(Value::as_str)
            .filter(|next| !next.is_empty())
            .map(str::to_owned);

        tracing::trace!(
            %url,
            resources = resources.len(),
            linked_groups = linked.len(),
            has_next = continuation.is_some(),
            "page parsed"
        );

        Self {
            status,
            headers,
            url,
            resource_name: resource_name.map(str::to_owned),
            json,
            resources,
            linked,
            continuation,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The URL this page was fetched from, query included.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn resource_name(&self) -> Option<&str> {
        self.resource_name.as_deref()
    }

    /// The whole response document.
    #[must_use]
    pub fn json(&self) -> &Value {
        &self.json
    }

    /// The primary resources, in response order.
    #[must_use]
    pub fn resources(&self) -> &[Value] {
        &self.resources
    }

    /// Resources of the inclusion `name`; empty when the group is absent.
    #[must_use]
    pub fn linked_resources(&self, name: &str) -> &[Value] {
        self.linked.get(name).map_or(&[], Vec::as_slice)
    }

    pub fn linked_names(&self) -> impl Iterator<Item = &str> {
        self.linked.keys().map(String::as_str)
    }

    /// `meta.next`, the path and query of the following page.
    #[must_use]
    pub fn continuation(&self) -> Option<&str> {
        self.continuation.as_deref()
    }

    /// `next` links of `meta.linked[name]`, one per linked collection that
    /// has more pages than the response embedded.
    #[must_use]
    pub fn linked_next_links(&self, name: &str) -> Vec<&str> {
        self.json
            .pointer("/meta/linked")
            .and_then(|linked| linked.get(name))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("next").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Inclusions named by the request's `include` query parameter.
    #[must_use]
    pub fn requested_inclusions(&self) -> Vec<String> {
        self.url
            .query_pairs()
            .filter(|(key, _)| key == "include")
            .flat_map(|(_, value)| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_owned)
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

/// Arrays are taken as-is, a single object becomes a one-element group.
fn group_values(value: Option<&Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other.clone()],
    }
}
