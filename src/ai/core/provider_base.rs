use super::providers::{ProviderError, ProxyConfig};
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use std::pin::Pin;
use std::time::Duration;

/// `data:` payloads of a server-sent-events response, in arrival order.
pub type SseDataStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Configuration options for HTTP client creation
#[derive(Debug, Clone, Default)]
pub struct HttpClientConfig {
    /// Optional timeout in seconds (defaults to reqwest's default if None)
    pub timeout_seconds: Option<u64>,
}

impl HttpClientConfig {
    pub fn with_timeout(timeout_seconds: u64) -> Self {
        Self {
            timeout_seconds: Some(timeout_seconds),
        }
    }
}

/// Common HTTP client builder that handles proxy configuration.
/// Shared by every provider regardless of its API format.
pub fn build_http_client(
    base_url: &str,
    proxy_config: Option<&ProxyConfig>,
    config: &HttpClientConfig,
) -> Result<Client, ProviderError> {
    let mut client_builder = Client::builder();

    if let Some(timeout_seconds) = config.timeout_seconds {
        client_builder = client_builder.timeout(Duration::from_secs(timeout_seconds));
    }

    if let Some(proxy_config) = proxy_config {
        if proxy_config.enabled && !proxy_config.url.is_empty() {
            let proxy_url = reqwest::Url::parse(&proxy_config.url)
                .map_err(|_| "Invalid proxy URL format")?;
            match proxy_url.scheme() {
                "http" | "https" | "socks5" => {}
                other => {
                    return Err(format!(
                        "Invalid proxy protocol '{}'. Only http://, https://, and socks5:// are supported",
                        other
                    )
                    .into());
                }
            }

            if should_use_proxy(base_url, &proxy_config.no_proxy) {
                let mut proxy = reqwest::Proxy::all(&proxy_config.url)?;
                if let (Some(username), Some(password)) =
                    (&proxy_config.username, &proxy_config.password)
                {
                    proxy = proxy.basic_auth(username, password);
                }
                client_builder = client_builder.proxy(proxy);
            }
        }
    }

    Ok(client_builder.build()?)
}

/// Whether `base_url` is not covered by any `no_proxy` host entry.
/// Unparseable URLs go through the proxy.
fn should_use_proxy(base_url: &str, no_proxy: &[String]) -> bool {
    match reqwest::Url::parse(base_url) {
        Ok(url) => !no_proxy.iter().any(|no_proxy_host| {
            url.host_str()
                .map(|host| host.contains(no_proxy_host.as_str()) || no_proxy_host.contains(host))
                .unwrap_or(false)
        }),
        Err(_) => true,
    }
}

/// Removes and returns every complete line held in `buffer`, trimmed and
/// non-empty. A trailing partial line stays buffered for the next network
/// chunk, so multi-byte characters split across chunks decode intact.
pub fn drain_complete_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(line_end) = buffer.iter().position(|&b| b == b'\n') {
        let raw: Vec<u8> = buffer.drain(..=line_end).collect();
        let line = String::from_utf8_lossy(&raw).trim().to_string();
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines
}

/// Takes whatever is left in `buffer` once the body has ended, for servers
/// that omit the newline after the last event.
pub fn take_remaining_line(buffer: &mut Vec<u8>) -> Option<String> {
    let raw = std::mem::take(buffer);
    let line = String::from_utf8_lossy(&raw).trim().to_string();
    if line.is_empty() {
        None
    } else {
        Some(line)
    }
}

/// Splits a response body into SSE `data:` payloads. The stream ends after
/// the first transport error, which it yields.
pub fn sse_data_stream<S, B, E>(body: S) -> SseDataStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ProviderError> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut body = Box::pin(body);
        let mut buffer: Vec<u8> = Vec::new();
        loop {
            let (lines, finished) = match body.next().await {
                Some(Ok(bytes)) => {
                    buffer.extend_from_slice(bytes.as_ref());
                    (drain_complete_lines(&mut buffer), false)
                }
                Some(Err(e)) => {
                    let error: ProviderError = e.into();
                    yield Err(error);
                    break;
                }
                None => (take_remaining_line(&mut buffer).into_iter().collect(), true),
            };

            for line in lines {
                if let Some(data) = sse_data(&line) {
                    yield Ok(data.to_string());
                }
            }
            if finished {
                break;
            }
        }
    };
    Box::pin(stream)
}

/// Payload of a server-sent-events `data:` line, `None` for other fields and
/// the OpenAI `[DONE]` sentinel.
pub fn sse_data(line: &str) -> Option<&str> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        None
    } else {
        Some(data)
    }
}
