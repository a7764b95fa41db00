//! MediaWiki action API requests
//!
//! Requests are built with [`ApiQuery`], which always asks for JSON and picks
//! pages through a [`PageSelector`] (by revision id or by title, never both).
//! [`ApiClient::query_continued`] follows `continue` blocks until the server
//! stops sending one.

use crate::error::{Error, Result};
use crate::http::HttpClient;
use serde_json::Value;
use url::Url;

/// Which page a query is about
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PageSelector {
    /// A specific revision
    Revision(u64),
    /// The latest revision of a title
    Title(String),
}

impl PageSelector {
    /// Prefer the revision id when one is known
    pub fn new(title: &str, revision: Option<u64>) -> Self {
        match revision {
            Some(rev) => PageSelector::Revision(rev),
            None => PageSelector::Title(title.to_string()),
        }
    }

    /// Human-readable form for status messages
    pub fn describe(&self) -> String {
        match self {
            PageSelector::Revision(rev) => format!("revision {rev}"),
            PageSelector::Title(_) => "latest revision".to_string(),
        }
    }
}

/// Parameters of one action API request
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApiQuery {
    params: Vec<(String, String)>,
}

impl ApiQuery {
    /// Start a request for `action` (`query`, `parse`, ...)
    pub fn new(action: &str) -> Self {
        let mut query = Self::default();
        query.set("action", action);
        query
    }

    /// Set a parameter, replacing any previous value
    pub fn param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Set a valueless flag parameter (`redirects`, `rvexpandtemplates`, ...)
    pub fn flag(self, key: &str) -> Self {
        self.param(key, "")
    }

    /// Select pages by `revids` or `titles`
    pub fn select(self, selector: &PageSelector) -> Self {
        match selector {
            PageSelector::Revision(rev) => self.param("revids", rev.to_string()),
            PageSelector::Title(title) => self.param("titles", title.clone()),
        }
    }

    /// Value of a parameter, if set
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.params.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.params.push((key.to_string(), value)),
        }
    }

    /// Full request URL against a wiki whose API lives at `<baseurl>/api.php`
    pub fn url(&self, baseurl: &str) -> Result<String> {
        let endpoint = format!("{}/api.php", baseurl.trim_end_matches('/'));
        let mut url = Url::parse(&endpoint).map_err(|e| {
            Error::PrefixResolution(format!("bad API base URL {baseurl:?}: {e}"))
        })?;
        {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &self.params {
                pairs.append_pair(k, v);
            }
            pairs.append_pair("format", "json");
        }
        Ok(url.to_string())
    }
}

/// Action API client
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: HttpClient,
}

impl ApiClient {
    /// Create a client issuing requests through `http`
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    /// Underlying HTTP client
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Run one request and return the decoded JSON response
    ///
    /// An `error` block in an otherwise successful response is reported as
    /// [`Error::InvalidResponse`].
    pub async fn request(&self, baseurl: &str, query: &ApiQuery) -> Result<Value> {
        let url = query.url(baseurl)?;
        let response: Value = self.http.get_json(&url).await?;
        if let Some(err) = response.get("error") {
            let code = err.get("code").and_then(Value::as_str).unwrap_or("unknown");
            let info = err.get("info").and_then(Value::as_str).unwrap_or("");
            return Err(Error::invalid_response(&url, format!("API error {code}: {info}")));
        }
        Ok(response)
    }

    /// Run a request and every continuation of it
    ///
    /// All keys of the server's `continue` block are copied into the next
    /// request. Responses are returned in order.
    pub async fn query_continued(&self, baseurl: &str, query: ApiQuery) -> Result<Vec<Value>> {
        let mut query = query.param("continue", "");
        let mut responses = Vec::new();
        loop {
            let response = self.request(baseurl, &query).await?;
            let next = response
                .get("continue")
                .and_then(Value::as_object)
                .cloned();
            responses.push(response);
            match next {
                Some(cont) => {
                    for (key, value) in cont {
                        query.set(&key, scalar_to_string(&value));
                    }
                }
                None => return Ok(responses),
            }
        }
    }
}

/// The single page of a `query.pages` response
pub fn first_page(response: &Value) -> Option<&Value> {
    response
        .get("query")?
        .get("pages")?
        .as_object()?
        .values()
        .next()
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> ApiClient {
        let retry = RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        };
        ApiClient::new(HttpClient::new("test", retry).unwrap())
    }

    #[test]
    fn selector_prefers_revision() {
        assert_eq!(PageSelector::new("Foo", Some(12)), PageSelector::Revision(12));
        assert_eq!(
            PageSelector::new("Foo", None),
            PageSelector::Title("Foo".to_string())
        );
        assert_eq!(PageSelector::Revision(12).describe(), "revision 12");
    }

    #[test]
    fn url_encodes_params_and_format() {
        let query = ApiQuery::new("query")
            .param("prop", "revisions")
            .select(&PageSelector::Title("A & B".into()))
            .flag("redirects");
        let url = query.url("https://en.wikipedia.org/w/").unwrap();
        assert!(url.starts_with("https://en.wikipedia.org/w/api.php?action=query"));
        assert!(url.contains("titles=A+%26+B"));
        assert!(url.contains("redirects=&"));
        assert!(url.ends_with("format=json"));
    }

    #[test]
    fn param_replaces_existing_value() {
        let query = ApiQuery::new("query").param("a", "1").param("a", "2");
        assert_eq!(query.get("a"), Some("2"));
    }

    #[tokio::test]
    async fn continuation_copies_every_continue_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api.php"))
            .and(query_param_is_missing("pccontinue"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "continue": {"pccontinue": "123|45", "continue": "||"},
                "query": {"pages": {"1": {"contributors": [{"name": "A"}]}}}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api.php"))
            .and(query_param("pccontinue", "123|45"))
            .and(query_param("continue", "||"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "query": {"pages": {"1": {"contributors": [{"name": "B"}]}}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let responses = client()
            .query_continued(&server.uri(), ApiQuery::new("query").param("prop", "contributors"))
            .await
            .unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(
            first_page(&responses[1]).unwrap()["contributors"][0]["name"],
            "B"
        );
    }

    #[tokio::test]
    async fn api_error_block_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api.php"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": {"code": "badvalue", "info": "Unrecognized value"}
            })))
            .mount(&server)
            .await;

        let err = client()
            .request(&server.uri(), &ApiQuery::new("query"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("badvalue"));
    }
}
