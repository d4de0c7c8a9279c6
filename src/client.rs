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

use anyhow::{Context, Result};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Method, Url};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

const UA: &str = "mistbackup/0.1";

#[derive(Debug, Clone)]
pub struct ResponseData {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
    pub json: Option<Value>,
}

impl ResponseData {
    /// Numeric response header, e.g. the `X-Page-*` paging headers.
    pub fn header_u64(&self, name: &str) -> Option<u64> {
        self.headers.get(name)?.to_str().ok()?.trim().parse().ok()
    }
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: Url,
    http: Client,
    api_token: String,
}

impl ApiClient {
    pub fn new(base_url: &str, api_token: &str) -> Result<Self> {
        let parsed = Url::parse(base_url).context("parsing base URL")?;
        let http = Client::builder()
            .user_agent(HeaderValue::from_static(UA))
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            base_url: parsed,
            http,
            api_token: api_token.to_string(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// GET a path relative to the API base URL. `path` may carry its own
    /// query string (cursor links returned by the API do).
    pub fn get(&self, path: &str, query: &[(&str, String)]) -> Result<ResponseData> {
        self.request(Method::GET, path, query, Option::<&Value>::None)
    }

    pub fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<ResponseData> {
        self.request(Method::POST, path, &[], Some(body))
    }

    pub fn put_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<ResponseData> {
        self.request(Method::PUT, path, &[], Some(body))
    }

    /// POST a file as the `file` field of a multipart form (map and portal
    /// images).
    pub fn upload(&self, path: &str, file_name: &str, bytes: Vec<u8>) -> Result<ResponseData> {
        let part = Part::bytes(bytes).file_name(file_name.to_string());
        let form = Form::new().part("file", part);
        debug!(path, file_name, "POST multipart");
        let request = self.builder(Method::POST, path)?.multipart(form);
        Self::finish(request)
    }

    fn request<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&T>,
    ) -> Result<ResponseData> {
        debug!(%method, path, ?query, "request");
        let mut request = self.builder(method, path)?;

        if !query.is_empty() {
            request = request.query(query);
        }

        if let Some(body) = body {
            request = request.json(body);
        }

        Self::finish(request)
    }

    fn builder(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let normalized = path.trim_start_matches('/');
        let url = self
            .base_url
            .join(normalized)
            .with_context(|| format!("joining path `{}` to base URL", path))?;

        Ok(self
            .http
            .request(method, url)
            .header(AUTHORIZATION, format!("Token {}", self.api_token))
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .header(USER_AGENT, HeaderValue::from_static(UA)))
    }

    fn finish(request: RequestBuilder) -> Result<ResponseData> {
        let response = request
            .send()
            .and_then(|r| r.error_for_status())
            .context("sending request")?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let text = response.text().context("reading response body")?;
        let json = serde_json::from_str(&text).ok();

        Ok(ResponseData {
            status,
            headers,
            body: text,
            json,
        })
    }

    /// Fetch an absolute URL (portal templates, images). The API token is
    /// only attached when the URL shares the API's origin.
    pub fn download(&self, url: &str) -> Result<Vec<u8>> {
        let parsed = Url::parse(url).with_context(|| format!("parsing asset URL `{}`", url))?;
        let same_origin = parsed.origin() == self.base_url.origin();

        let mut request = self
            .http
            .get(parsed)
            .header(USER_AGENT, HeaderValue::from_static(UA));
        if same_origin {
            request = request.header(AUTHORIZATION, format!("Token {}", self.api_token));
        }

        debug!(url, same_origin, "downloading asset");
        let response = request
            .send()
            .and_then(|r| r.error_for_status())
            .context("sending download request")?;
        let bytes = response.bytes().context("reading download body")?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn sends_token_and_parses_json() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/v1/self")
                .header("Authorization", "Token test-token");
            then.status(200)
                .header("X-Page-Total", "42")
                .json_body(json!({"email": "ops@example.test", "privileges": []}));
        });

        let client = ApiClient::new(&server.base_url(), "test-token").unwrap();
        let response = client.get("/api/v1/self", &[]).unwrap();

        mock.assert();
        assert_eq!(response.status, 200);
        assert_eq!(response.header_u64("X-Page-Total"), Some(42));
        assert_eq!(response.header_u64("X-Page-Limit"), None);
        assert_eq!(response.json.unwrap()["email"], "ops@example.test");
    }

    #[test]
    fn keeps_query_embedded_in_path() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/v1/orgs/o1/devices/search")
                .query_param("cursor", "abc");
            then.status(200).json_body(json!({"results": []}));
        });

        let client = ApiClient::new(&server.base_url(), "t").unwrap();
        client
            .get("/api/v1/orgs/o1/devices/search?cursor=abc", &[])
            .unwrap();

        mock.assert();
    }

    #[test]
    fn error_status_is_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/orgs/o1/wlans");
            then.status(403).json_body(json!({"detail": "forbidden"}));
        });

        let client = ApiClient::new(&server.base_url(), "t").unwrap();
        let err = client.get("/api/v1/orgs/o1/wlans", &[]).unwrap_err();
        assert!(format!("{:#}", err).contains("403"));
    }

    #[test]
    fn posts_and_puts_json_bodies() {
        let server = MockServer::start();
        let create = server.mock(|when, then| {
            when.method(POST)
                .path("/api/v1/orgs/o1/webhooks")
                .header("Authorization", "Token t")
                .json_body(json!({"name": "hook"}));
            then.status(200).json_body(json!({"id": "wh1", "name": "hook"}));
        });
        let update = server.mock(|when, then| {
            when.method(PUT)
                .path("/api/v1/orgs/o1/setting")
                .json_body(json!({"mxedge_mgmt": {}}));
            then.status(200).json_body(json!({}));
        });

        let client = ApiClient::new(&server.base_url(), "t").unwrap();
        let created = client
            .post_json("/api/v1/orgs/o1/webhooks", &json!({"name": "hook"}))
            .unwrap();
        client
            .put_json("api/v1/orgs/o1/setting", &json!({"mxedge_mgmt": {}}))
            .unwrap();

        create.assert();
        update.assert();
        assert_eq!(created.json.unwrap()["id"], "wh1");
    }

    #[test]
    fn uploads_file_as_multipart_form() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/api/v1/sites/s1/maps/m1/image")
                .header_exists("content-type")
                .body_contains("name=\"file\"")
                .body_contains("floor.png")
                .body_contains("PNGDATA");
            then.status(200).json_body(json!({}));
        });

        let client = ApiClient::new(&server.base_url(), "t").unwrap();
        client
            .upload("api/v1/sites/s1/maps/m1/image", "floor.png", b"PNGDATA".to_vec())
            .unwrap();

        mock.assert();
    }

    #[test]
    fn downloads_bytes_with_token_on_same_origin() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/maps/m1.png")
                .header("Authorization", "Token t");
            then.status(200).body([0x89u8, b'P', b'N', b'G']);
        });

        let client = ApiClient::new(&server.base_url(), "t").unwrap();
        let bytes = client.download(&server.url("/maps/m1.png")).unwrap();

        mock.assert();
        assert_eq!(bytes, vec![0x89u8, b'P', b'N', b'G']);
    }

    #[test]
    fn download_reports_missing_asset() {
        let api = MockServer::start();
        let storage = MockServer::start();
        storage.mock(|when, then| {
            when.method(GET).path("/portal/w1.png");
            then.status(404);
        });

        let client = ApiClient::new(&api.base_url(), "t").unwrap();
        assert!(client.download(&storage.url("/portal/w1.png")).is_err());
    }
}
