//! Media REST endpoints over `reqwest`.

use async_trait::async_trait;
use media_utils::{
    MediaFile, file_extension, file_name_from_url, mime_type_from_extension, sanitize_filename,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, header::HeaderMap};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::MediaTransport;
use super::attachment::RestAttachment;
use super::form::form_fields;
use crate::queue::{AdditionalData, Attachment};
use crate::{Error, Result};

/// Connection settings of [`RestTransport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestTransportConfig {
    /// REST API root, e.g. `https://example.com/wp-json`.
    pub base_url: String,
    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    pub auth: Option<RestAuth>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    300
}

impl Default for RestTransportConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            headers: Vec::new(),
            auth: None,
            timeout_secs: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RestAuth {
    Bearer { token: String },
    /// Application password.
    Basic { username: String, password: String },
    /// Cookie auth nonce or any other single header.
    Header { name: String, value: String },
}

#[derive(Debug, Deserialize)]
struct RestErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// [`MediaTransport`] talking to `/wp/v2/media`.
pub struct RestTransport {
    config: RestTransportConfig,
    client: Client,
}

impl RestTransport {
    pub fn new(config: RestTransportConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self { config, client }
    }

    fn endpoint(&self, path: &str, embed_poster: bool) -> Result<Url> {
        let base = self.config.base_url.trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}/{}", path.trim_start_matches('/')))
            .map_err(|e| Error::config(format!("Invalid REST base URL {base}: {e}")))?;
        if embed_poster {
            // Lets video consumers read the poster straight from the response.
            url.query_pairs_mut().append_pair("_embed", "wp:featuredmedia");
        }
        Ok(url)
    }

    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        for (name, value) in &self.config.headers {
            if let (Ok(name), Ok(value)) = (
                name.parse::<reqwest::header::HeaderName>(),
                value.parse::<reqwest::header::HeaderValue>(),
            ) {
                headers.insert(name, value);
            }
        }

        match &self.config.auth {
            Some(RestAuth::Bearer { token }) => {
                if let Ok(value) = format!("Bearer {token}").parse() {
                    headers.insert(reqwest::header::AUTHORIZATION, value);
                }
            }
            Some(RestAuth::Header { name, value }) => {
                if let (Ok(name), Ok(value)) = (
                    name.parse::<reqwest::header::HeaderName>(),
                    value.parse::<reqwest::header::HeaderValue>(),
                ) {
                    headers.insert(name, value);
                }
            }
            // Applied on the request builder.
            Some(RestAuth::Basic { .. }) | None => {}
        }

        headers
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.headers(self.build_headers());
        match &self.config.auth {
            Some(RestAuth::Basic { username, password }) => {
                builder.basic_auth(username, Some(password))
            }
            _ => builder,
        }
    }

    fn multipart(file: &MediaFile, data: &AdditionalData) -> Result<Form> {
        let name = if file.name().is_empty() {
            file.mime_type().replace('/', ".")
        } else {
            file.name().to_string()
        };
        let part = Part::bytes(file.data().to_vec())
            .file_name(name)
            .mime_str(file.mime_type())?;

        let mut form = Form::new().part("file", part);
        for (key, value) in form_fields(data) {
            form = form.text(key, value);
        }
        Ok(form)
    }

    async fn send(
        &self,
        builder: RequestBuilder,
        cancel: Option<&CancellationToken>,
        what: &str,
    ) -> Result<RestAttachment> {
        let request = self.request(builder).send();
        let response = match cancel {
            Some(cancel) => tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("{} aborted", what);
                    return Err(Error::transport(format!("{what} aborted")));
                }
                response = request => response?,
            },
            None => request.await?,
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("{} failed: {} - {}", what, status, body);
            let message = serde_json::from_str::<RestErrorBody>(&body)
                .ok()
                .and_then(|b| match (b.code, b.message) {
                    (Some(code), Some(message)) => Some(format!("{code}: {message}")),
                    (_, message) => message,
                })
                .unwrap_or(body);
            return Err(Error::transport(format!("{what} failed: {status} - {message}")));
        }

        Ok(response.json::<RestAttachment>().await?)
    }
}

#[async_trait]
impl MediaTransport for RestTransport {
    async fn upload_to_server(
        &self,
        file: &MediaFile,
        data: &AdditionalData,
        cancel: &CancellationToken,
    ) -> Result<Attachment> {
        let url = self.endpoint("wp/v2/media", true)?;
        let form = Self::multipart(file, data)?;
        let rest = self
            .send(self.client.post(url).multipart(form), Some(cancel), "Upload")
            .await?;
        debug!(attachment_id = rest.id, file = %file.name(), "Uploaded file");
        Ok(rest.into())
    }

    async fn sideload_to_server(
        &self,
        file: &MediaFile,
        attachment_id: u64,
        data: &AdditionalData,
        cancel: &CancellationToken,
    ) -> Result<Attachment> {
        let url = self.endpoint(&format!("wp/v2/media/{attachment_id}/sideload"), true)?;
        let form = Self::multipart(file, data)?;
        let rest = self
            .send(self.client.post(url).multipart(form), Some(cancel), "Sideload")
            .await?;
        debug!(attachment_id, file = %file.name(), "Sideloaded file");
        Ok(rest.into())
    }

    async fn update_media_item(&self, id: u64, data: serde_json::Value) -> Result<Attachment> {
        let url = self.endpoint(&format!("wp/v2/media/{id}"), false)?;
        let rest = self
            .send(self.client.post(url).json(&data), None, "Media update")
            .await?;
        Ok(rest.into())
    }

    async fn fetch_remote_file(&self, url: &str, name: Option<&str>) -> Result<MediaFile> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            warn!("Fetching {} failed: {}", url, status);
            return Err(Error::transport(format!("Fetching {url} failed: {status}")));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or_default().trim().to_string())
            .filter(|v| !v.is_empty() && v != "application/octet-stream");
        let data = response.bytes().await?;

        let name = match name {
            Some(name) => sanitize_filename(name),
            None => file_name_from_url(url),
        };
        let mime_type = content_type
            .or_else(|| {
                file_extension(&name)
                    .and_then(mime_type_from_extension)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "application/octet-stream".to_string());

        debug!(url, name = %name, mime_type = %mime_type, size = data.len(), "Fetched remote file");
        Ok(MediaFile::new(name, mime_type, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(base: &str) -> RestTransport {
        RestTransport::new(RestTransportConfig {
            base_url: base.to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_endpoints() {
        let t = transport("https://example.com/wp-json/");
        assert_eq!(
            t.endpoint("wp/v2/media", true).unwrap().as_str(),
            "https://example.com/wp-json/wp/v2/media?_embed=wp%3Afeaturedmedia"
        );
        assert_eq!(
            t.endpoint("/wp/v2/media/12", false).unwrap().as_str(),
            "https://example.com/wp-json/wp/v2/media/12"
        );
        assert!(transport("not a url").endpoint("wp/v2/media", false).is_err());
    }

    #[test]
    fn test_auth_headers() {
        let t = RestTransport::new(RestTransportConfig {
            base_url: "https://example.com/wp-json".into(),
            headers: vec![("X-Custom".into(), "1".into())],
            auth: Some(RestAuth::Header {
                name: "X-WP-Nonce".into(),
                value: "abc".into(),
            }),
            ..Default::default()
        });
        let headers = t.build_headers();
        assert_eq!(headers.get("x-wp-nonce").unwrap(), "abc");
        assert_eq!(headers.get("x-custom").unwrap(), "1");
    }

    #[test]
    fn test_config_defaults() {
        let config: RestTransportConfig =
            serde_json::from_str(r#"{"base_url": "https://example.com/wp-json", "auth": null}"#)
                .unwrap();
        assert_eq!(config.timeout_secs, 300);
        assert!(config.headers.is_empty());
    }
}
