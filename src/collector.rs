// mistbackup - configuration backups for Mist cloud organizations
// Copyright (C) 2026 The mistbackup contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Exhausts paged listing endpoints.
//!
//! Two paging styles are understood:
//! - `X-Page-Total` / `X-Page-Limit` / `X-Page-Page` headers on a JSON array
//!   body; another page exists while `page * limit < total`.
//! - `{"results": [...], "next": "/api/v1/..."}` bodies; `next` is followed
//!   until it disappears.

use crate::client::{ApiClient, ResponseData};
use crate::steps::{Capability, Shape};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("fetching page {page} failed: {cause}")]
pub struct TransportError {
    pub page: u32,
    pub cause: String,
}

impl TransportError {
    fn new(page: u32, cause: impl Into<String>) -> Self {
        Self {
            page,
            cause: cause.into(),
        }
    }

    fn from_request(page: u32, err: anyhow::Error) -> Self {
        Self::new(page, format!("{:#}", err))
    }
}

pub struct Collector<'a> {
    client: &'a ApiClient,
    page_limit: u32,
}

impl<'a> Collector<'a> {
    pub fn new(client: &'a ApiClient, page_limit: u32) -> Self {
        Self {
            client,
            page_limit: page_limit.max(1),
        }
    }

    /// Every item of every page, in the order the pages arrived. A failure on
    /// any page discards what was already collected.
    pub fn collect(
        &self,
        capability: &Capability,
        scope_id: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<Vec<Value>, TransportError> {
        let path = capability.path_for(scope_id);
        let query: Vec<(&str, String)> = params
            .iter()
            .map(|(k, v)| (k.as_str(), v.clone()))
            .collect();

        match capability.shape() {
            Shape::Document => self.collect_document(&path, &query),
            Shape::List => self.collect_list(&path, query),
        }
    }

    fn collect_document(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<Value>, TransportError> {
        let response = self
            .client
            .get(path, query)
            .map_err(|err| TransportError::from_request(1, err))?;
        let json = response
            .json
            .ok_or_else(|| TransportError::new(1, "response body is not JSON"))?;
        Ok(vec![json])
    }

    fn collect_list(
        &self,
        path: &str,
        base_query: Vec<(&str, String)>,
    ) -> Result<Vec<Value>, TransportError> {
        let mut items = Vec::new();
        let mut page: u32 = 1;
        let mut cursor: Option<String> = None;

        loop {
            let response = match &cursor {
                Some(next) => self.client.get(next, &[]),
                None => {
                    let mut query = base_query.clone();
                    query.push(("limit", self.page_limit.to_string()));
                    query.push(("page", page.to_string()));
                    self.client.get(path, &query)
                }
            }
            .map_err(|err| TransportError::from_request(page, err))?;

            let more = self.has_more_pages(&response, page);
            match response.json {
                Some(Value::Array(batch)) => {
                    let received = batch.len();
                    items.extend(batch);
                    debug!(path, page, received, total = items.len(), "collected page");
                    if !more || received == 0 {
                        break;
                    }
                    cursor = None;
                }
                Some(Value::Object(mut body))
                    if body.get("results").is_some_and(Value::is_array) =>
                {
                    let batch = match body.remove("results") {
                        Some(Value::Array(batch)) => batch,
                        _ => Vec::new(),
                    };
                    let received = batch.len();
                    items.extend(batch);
                    debug!(path, page, received, total = items.len(), "collected page");
                    match body.get("next").and_then(Value::as_str) {
                        Some(next) if !next.is_empty() && received > 0 => {
                            cursor = Some(next.to_string());
                        }
                        _ => break,
                    }
                }
                Some(_) => {
                    return Err(TransportError::new(
                        page,
                        "expected a JSON array or a paged `results` object",
                    ));
                }
                None => return Err(TransportError::new(page, "response body is not JSON")),
            }
            page += 1;
        }

        Ok(items)
    }

    fn has_more_pages(&self, response: &ResponseData, requested: u32) -> bool {
        let Some(total) = response.header_u64("X-Page-Total") else {
            return false;
        };
        let limit = response
            .header_u64("X-Page-Limit")
            .unwrap_or(u64::from(self.page_limit));
        let current = response
            .header_u64("X-Page-Page")
            .unwrap_or(u64::from(requested));
        current.saturating_mul(limit) < total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn wlans() -> Capability {
        Capability::list("api/v1/sites/{scope}/wlans")
    }

    #[test]
    fn follows_page_headers_until_total_is_reached() {
        let server = MockServer::start();
        let pages = [
            json!([{"id": "w1"}, {"id": "w2"}]),
            json!([{"id": "w3"}, {"id": "w4"}]),
            json!([{"id": "w5"}]),
        ];
        let mocks: Vec<_> = pages
            .iter()
            .enumerate()
            .map(|(idx, body)| {
                let page = (idx + 1).to_string();
                server.mock(|when, then| {
                    when.method(GET)
                        .path("/api/v1/sites/s1/wlans")
                        .query_param("limit", "2")
                        .query_param("page", page.as_str());
                    then.status(200)
                        .header("X-Page-Total", "5")
                        .header("X-Page-Limit", "2")
                        .header("X-Page-Page", page.as_str())
                        .json_body(body.clone());
                })
            })
            .collect();
        let beyond = server.mock(|when, then| {
            when.method(GET)
                .path("/api/v1/sites/s1/wlans")
                .query_param("page", "4");
            then.status(200).json_body(json!([]));
        });

        let client = ApiClient::new(&server.base_url(), "t").unwrap();
        let items = Collector::new(&client, 2)
            .collect(&wlans(), "s1", &BTreeMap::new())
            .unwrap();

        for mock in &mocks {
            mock.assert();
        }
        beyond.assert_hits(0);
        let ids: Vec<_> = items.iter().map(|i| i["id"].as_str().unwrap()).collect();
        assert_eq!(ids, ["w1", "w2", "w3", "w4", "w5"]);
    }

    #[test]
    fn bare_array_without_headers_is_one_page() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/v1/orgs/o1/deviceprofiles")
                .query_param("type", "gateway")
                .query_param("page", "1");
            then.status(200).json_body(json!([{"id": "hub1"}]));
        });

        let client = ApiClient::new(&server.base_url(), "t").unwrap();
        let params = BTreeMap::from([("type".to_string(), "gateway".to_string())]);
        let items = Collector::new(&client, DEFAULT_PAGE_LIMIT)
            .collect(
                &Capability::list("api/v1/orgs/{scope}/deviceprofiles"),
                "o1",
                &params,
            )
            .unwrap();

        mock.assert_hits(1);
        assert_eq!(items, vec![json!({"id": "hub1"})]);
    }

    #[test]
    fn follows_next_cursor() {
        let server = MockServer::start();
        let first = server.mock(|when, then| {
            when.method(GET)
                .path("/api/v1/orgs/o1/psks")
                .query_param("page", "1");
            then.status(200).json_body(json!({
                "results": [{"id": "p1"}, {"id": "p2"}],
                "next": "/api/v1/orgs/o1/psks?cursor=abc"
            }));
        });
        let second = server.mock(|when, then| {
            when.method(GET)
                .path("/api/v1/orgs/o1/psks")
                .query_param("cursor", "abc");
            then.status(200).json_body(json!({"results": [{"id": "p3"}]}));
        });

        let client = ApiClient::new(&server.base_url(), "t").unwrap();
        let items = Collector::new(&client, 2)
            .collect(
                &Capability::list("api/v1/orgs/{scope}/psks"),
                "o1",
                &BTreeMap::new(),
            )
            .unwrap();

        first.assert();
        second.assert();
        assert_eq!(items.len(), 3);
        assert_eq!(items[2]["id"], "p3");
    }

    #[test]
    fn failure_on_later_page_discards_everything() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/api/v1/sites/s1/wlans")
                .query_param("page", "1");
            then.status(200)
                .header("X-Page-Total", "4")
                .header("X-Page-Limit", "2")
                .header("X-Page-Page", "1")
                .json_body(json!([{"id": "w1"}, {"id": "w2"}]));
        });
        server.mock(|when, then| {
            when.method(GET)
                .path("/api/v1/sites/s1/wlans")
                .query_param("page", "2");
            then.status(500);
        });

        let client = ApiClient::new(&server.base_url(), "t").unwrap();
        let err = Collector::new(&client, 2)
            .collect(&wlans(), "s1", &BTreeMap::new())
            .unwrap_err();

        assert_eq!(err.page, 2);
        assert!(err.cause.contains("500"));
    }

    #[test]
    fn documents_are_fetched_once_without_paging() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/api/v1/orgs/o1/setting");
            then.status(200)
                .json_body(json!({"password_policy": {"enabled": true}}));
        });

        let client = ApiClient::new(&server.base_url(), "t").unwrap();
        let items = Collector::new(&client, 2)
            .collect(
                &Capability::document("api/v1/orgs/{scope}/setting"),
                "o1",
                &BTreeMap::new(),
            )
            .unwrap();

        mock.assert_hits(1);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["password_policy"]["enabled"], true);
    }

    #[test]
    fn non_json_and_wrong_shapes_are_decode_failures() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/sites/s1/wlans");
            then.status(200).body("<html>maintenance</html>");
        });
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/sites/s1/maps");
            then.status(200).json_body(json!({"id": "not-a-list"}));
        });

        let client = ApiClient::new(&server.base_url(), "t").unwrap();
        let collector = Collector::new(&client, 2);

        let err = collector
            .collect(&wlans(), "s1", &BTreeMap::new())
            .unwrap_err();
        assert_eq!(err.page, 1);
        assert!(err.cause.contains("not JSON"));

        let err = collector
            .collect(
                &Capability::list("api/v1/sites/{scope}/maps"),
                "s1",
                &BTreeMap::new(),
            )
            .unwrap_err();
        assert!(err.cause.contains("expected a JSON array"));
    }
}
