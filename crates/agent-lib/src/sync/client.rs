//! HTTP client for the central API with bearer-token authentication

use crate::error::SyncError;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use url::Url;

/// Thin JSON client over the central API base URL
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl ApiClient {
    /// Create a client rooted at `base_url`. Paths passed to the request
    /// helpers are resolved relative to it.
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self, SyncError> {
        let client = Client::builder().timeout(timeout).build()?;

        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;

        Ok(Self {
            client,
            base_url,
            token: token.filter(|t| !t.is_empty()),
        })
    }

    pub(crate) fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub(crate) fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Resolve a relative path against the base URL
    pub fn url(&self, path: &str) -> Result<Url, SyncError> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send a bodiless request and hand back the status, whatever it is
    pub async fn status_of(&self, method: Method, path: &str) -> Result<StatusCode, SyncError> {
        let url = self.url(path)?;
        let response = self.request(method, url).send().await?;
        Ok(response.status())
    }

    /// GET and decode a JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SyncError> {
        let url = self.url(path)?;
        let response = self.request(Method::GET, url.clone()).send().await?;
        let response = ensure_success(Method::GET, &url, response).await?;
        Ok(response.json().await?)
    }

    /// GET with query parameters and decode a JSON body
    pub async fn get_json_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SyncError> {
        let mut url = self.url(path)?;
        url.query_pairs_mut().extend_pairs(query);
        let response = self.request(Method::GET, url.clone()).send().await?;
        let response = ensure_success(Method::GET, &url, response).await?;
        Ok(response.json().await?)
    }

    /// Send a JSON body and return the raw status; non-2xx is not an error here
    pub async fn send_json_status<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<(StatusCode, String), SyncError> {
        let url = self.url(path)?;
        let response = self.request(method, url).json(body).send().await?;
        let status = response.status();
        let text = if status.is_success() {
            String::new()
        } else {
            response.text().await.unwrap_or_default()
        };
        Ok((status, text))
    }

    /// Send a JSON body, failing on any non-2xx status
    pub async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<(), SyncError> {
        let url = self.url(path)?;
        let response = self.request(method.clone(), url.clone()).json(body).send().await?;
        ensure_success(method, &url, response).await?;
        Ok(())
    }

    /// DELETE a resource; a 404 counts as already deleted
    pub async fn delete(&self, path: &str) -> Result<(), SyncError> {
        let url = self.url(path)?;
        let response = self.request(Method::DELETE, url.clone()).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        ensure_success(Method::DELETE, &url, response).await?;
        Ok(())
    }
}

/// Build the typed status error used across the transport
pub(crate) fn status_error(method: &Method, url: &Url, status: StatusCode, body: String) -> SyncError {
    SyncError::Status {
        method: method.to_string(),
        url: url.to_string(),
        status: status.as_u16(),
        body,
    }
}

async fn ensure_success(method: Method, url: &Url, response: Response) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(&method, url, status, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalized() {
        let client = ApiClient::new("http://api:8080/api/v1", None, Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url().as_str(), "http://api:8080/api/v1/");
        assert_eq!(
            client.url("/containers/abc").unwrap().as_str(),
            "http://api:8080/api/v1/containers/abc"
        );
    }

    #[test]
    fn test_empty_token_is_no_token() {
        let client =
            ApiClient::new("http://api:8080/", Some(String::new()), Duration::from_secs(5)).unwrap();
        assert!(!client.has_token());
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            ApiClient::new("not a url", None, Duration::from_secs(5)),
            Err(SyncError::Url(_))
        ));
    }
}
