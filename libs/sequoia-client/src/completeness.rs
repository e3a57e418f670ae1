//! Decides whether a successful page already holds the resources a caller is
//! waiting for.
//!
//! Services populate some collections asynchronously, so an empty group in a
//! `200` response can mean "not yet". A [`RetrySpec`] names the groups that
//! must be non-empty; pages that fail it are retried as incomplete results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::page::Page;

/// Which resource groups must be non-empty before a page is accepted.
///
/// Deserializes from either a bool or a map of group name to bool, matching
/// the `retry_when_empty_result` configuration key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RetrySpec {
    /// `true`: the primary resources and every inclusion requested through
    /// the `include` query parameter. `false`: nothing.
    AllGroups(bool),
    /// Group name (the endpoint's resource name or an inclusion name) to
    /// "must be non-empty". Groups mapped to `false` or absent are not checked.
    PerGroup(BTreeMap<String, bool>),
}

impl RetrySpec {
    #[must_use]
    pub fn per_group<I, K>(groups: I) -> Self
    where
        I: IntoIterator<Item = (K, bool)>,
        K: Into<String>,
    {
        Self::PerGroup(groups.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// The spec for pages fetched from the `/data/<name>` endpoint of an
    /// inclusion, where `name` is the primary group.
    ///
    /// A per-group entry for `name` carries over; entries for other groups
    /// do not exist on those pages and are dropped.
    #[must_use]
    pub fn for_inclusion(&self, name: &str) -> Option<Self> {
        match self {
            Self::AllGroups(all) => Some(Self::AllGroups(*all)),
            Self::PerGroup(groups) => groups
                .get(name)
                .copied()
                .filter(|required| *required)
                .map(|required| Self::per_group([(name, required)])),
        }
    }
}

/// `true` when `page` satisfies `spec`; an absent spec accepts everything.
#[must_use]
pub fn is_complete(page: &Page, spec: Option<&RetrySpec>) -> bool {
    match spec {
        None | Some(RetrySpec::AllGroups(false)) => true,
        Some(RetrySpec::AllGroups(true)) => {
            !page.resources().is_empty()
                && page
                    .requested_inclusions()
                    .iter()
                    .all(|name| !page.linked_resources(name).is_empty())
        }
        Some(RetrySpec::PerGroup(groups)) => groups
            .iter()
            .filter(|(_, required)| **required)
            .all(|(name, _)| !group(page, name).is_empty()),
    }
}

fn group<'a>(page: &'a Page, name: &str) -> &'a [serde_json::Value] {
    if page.resource_name() == Some(name) {
        page.resources()
    } else {
        page.linked_resources(name)
    }
}
