use crate::error::{ServiceError, ServiceResult};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header::CONTENT_TYPE, Client, Response, Url};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::io::AsyncWriteExt;

#[async_trait]
pub trait ArtifactFetcher: Send + Sync + 'static {
    /// Downloads `url` into `dest`, returning the number of bytes written.
    async fn fetch(&self, url: &str, dest: &Path) -> ServiceResult<u64>;
}

/// Plain HTTP(S) download that also understands the Google Drive
/// "can't scan this file for viruses" interstitial.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> ServiceResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::ModelUnavailable(format!("http client: {}", e)))?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> ServiceResult<Response> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ServiceError::ModelUnavailable(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ServiceError::ModelUnavailable(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }
        Ok(response)
    }
}

fn is_html(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/html"))
}

/// Extracts the value of the first `confirm=` parameter in an HTML page.
pub fn find_confirm_token(page: &str) -> Option<&str> {
    let start = page.find("confirm=")? + "confirm=".len();
    let token = &page[start..];
    let end = token
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        .unwrap_or(token.len());
    (end > 0).then(|| &token[..end])
}

fn with_confirm(url: &str, token: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}confirm={}", url, separator, token)
}

fn unescape(value: &str) -> String {
    value
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

/// Value of a double-quoted attribute inside a single tag.
fn attribute<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!(" {}=\"", name);
    let start = tag.find(&needle)? + needle.len();
    let end = tag[start..].find('"')?;
    Some(&tag[start..start + end])
}

/// The `download-form` served by Drive for files too large to scan: its
/// `action` and the name/value pairs of its inputs.
pub fn find_download_form(page: &str) -> Option<(String, Vec<(String, String)>)> {
    let marker = page.find("id=\"download-form\"")?;
    let form_start = page[..marker].rfind("<form")?;
    let form_end = page[form_start..]
        .find("</form>")
        .map(|i| form_start + i)
        .unwrap_or(page.len());
    let form = &page[form_start..form_end];

    let open_tag = &form[..form.find('>')?];
    let action = unescape(attribute(open_tag, "action")?);

    let params = form
        .split("<input")
        .skip(1)
        .filter_map(|input| {
            let tag = &input[..input.find('>').unwrap_or(input.len())];
            let name = attribute(tag, "name")?;
            let value = attribute(tag, "value").unwrap_or("");
            Some((unescape(name), unescape(value)))
        })
        .collect();

    Some((action, params))
}

fn form_url(base: &str, action: &str, params: &[(String, String)]) -> ServiceResult<String> {
    let mut url = Url::parse(base)
        .and_then(|base| base.join(action))
        .map_err(|e| {
            ServiceError::ModelUnavailable(format!(
                "invalid download form action {:?}: {}",
                action, e
            ))
        })?;
    url.query_pairs_mut()
        .extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    Ok(url.to_string())
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut partial = dest.as_os_str().to_os_string();
    partial.push(".part");
    PathBuf::from(partial)
}

async fn stream_to_file(response: Response, partial: &Path) -> ServiceResult<u64> {
    let io_err = |e: std::io::Error| {
        ServiceError::ModelUnavailable(format!("cannot write {:?}: {}", partial, e))
    };

    let mut file = tokio::fs::File::create(partial).await.map_err(io_err)?;
    let mut written = 0u64;
    let mut stream = Box::pin(response.bytes_stream());

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            ServiceError::ModelUnavailable(format!(
                "download interrupted after {} bytes: {}",
                written, e
            ))
        })?;
        file.write_all(&chunk).await.map_err(io_err)?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(io_err)?;
    Ok(written)
}

/// Streams into `<dest>.part` and renames it into place. The partial file is
/// removed on every failure.
async fn write_body(response: Response, dest: &Path) -> ServiceResult<u64> {
    let partial = partial_path(dest);

    let result = match stream_to_file(response, &partial).await {
        Ok(written) => tokio::fs::rename(&partial, dest)
            .await
            .map(|_| written)
            .map_err(|e| {
                ServiceError::ModelUnavailable(format!("cannot move model to {:?}: {}", dest, e))
            }),
        Err(e) => Err(e),
    };

    if result.is_err() {
        let _ = tokio::fs::remove_file(&partial).await;
    }
    result
}

#[async_trait]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> ServiceResult<u64> {
        let mut response = self.get(url).await?;

        if is_html(&response) {
            let page = response
                .text()
                .await
                .map_err(|e| ServiceError::ModelUnavailable(format!("request failed: {}", e)))?;

            let confirmed_url = if let Some(token) = find_confirm_token(&page) {
                with_confirm(url, token)
            } else if let Some((action, params)) = find_download_form(&page) {
                form_url(url, &action, &params)?
            } else {
                return Err(ServiceError::ModelUnavailable(format!(
                    "{} returned an HTML page instead of a model",
                    url
                )));
            };

            tracing::info!("Large file interstitial, confirming download");
            response = self.get(&confirmed_url).await?;

            if is_html(&response) {
                return Err(ServiceError::ModelUnavailable(format!(
                    "{} still returned an HTML page after confirmation",
                    url
                )));
            }
        }

        write_body(response, dest).await
    }
}
