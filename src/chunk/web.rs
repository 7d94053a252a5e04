//! Web chunker: fetch a public HTTP(S) page, strip markup, then run the
//! fixed-window text chunker. URL resolution rejects private address space
//! (SSRF guard) before any request is made.

use std::net::{IpAddr, ToSocketAddrs};

use url::Url;

use crate::error::{CoreError, CoreResult};

use super::epub::strip_markup;
use super::text::fixed_window_chunk;
use super::{require_non_empty, ChunkSizing, ChunkedPiece, Chunker, TokenCounter};

pub struct WebChunker;

impl Chunker for WebChunker {
    fn chunk(
        &self,
        raw_content: &[u8],
        sizing: ChunkSizing,
        counter: &dyn TokenCounter,
    ) -> CoreResult<Vec<ChunkedPiece>> {
        let text = strip_markup(raw_content);
        let pieces = fixed_window_chunk(&text, sizing, counter);
        require_non_empty(pieces, "web")
    }
}

/// True if `ip` falls in a private, loopback, link-local, or otherwise
/// non-public range — the set a web fetch must never be allowed to reach.
fn is_disallowed_address(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_documentation()
                || v4.is_unspecified()
                || v4.octets()[0] == 0
        }
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xfe00) == 0xfc00
        }
    }
}

/// Validates scheme and resolved address space before any network request
/// is made. Only `http`/`https` are whitelisted.
pub fn validate_fetch_url(url: &str) -> CoreResult<Url> {
    let parsed = Url::parse(url).map_err(|e| CoreError::Configuration(format!("invalid URL: {e}")))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(CoreError::Ssrf { url: url.to_string() });
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| CoreError::Ssrf { url: url.to_string() })?;
    let port = parsed.port_or_known_default().unwrap_or(443);

    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| CoreError::Configuration(format!("could not resolve {host}: {e}")))?;

    for addr in addrs {
        if is_disallowed_address(addr.ip()) {
            return Err(CoreError::Ssrf { url: url.to_string() });
        }
    }

    Ok(parsed)
}

/// Fetches `url` after the SSRF guard passes.
pub async fn fetch_url(url: &str) -> CoreResult<Vec<u8>> {
    let validated = validate_fetch_url(url)?;

    let response = reqwest::get(validated)
        .await
        .map_err(|e| CoreError::TransientProviderFailure {
            attempts: 1,
            message: e.to_string(),
        })?;

    if !response.status().is_success() {
        return Err(CoreError::FatalProviderFailure(format!(
            "fetching {url}: HTTP {}",
            response.status()
        )));
    }

    response
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| CoreError::FatalProviderFailure(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_scheme() {
        assert!(matches!(
            validate_fetch_url("file:///etc/passwd"),
            Err(CoreError::Ssrf { .. })
        ));
    }

    #[test]
    fn rejects_loopback_host() {
        assert!(matches!(
            validate_fetch_url("http://127.0.0.1/admin"),
            Err(CoreError::Ssrf { .. })
        ));
    }

    #[test]
    fn rejects_link_local_metadata_host() {
        assert!(matches!(
            validate_fetch_url("http://169.254.169.254/latest/meta-data"),
            Err(CoreError::Ssrf { .. })
        ));
    }

    #[test]
    fn accepts_public_scheme_and_syntax() {
        // Only checks scheme/syntax validation path without performing DNS
        // resolution against a real public host in the test environment.
        let parsed = Url::parse("https://example.com/page").unwrap();
        assert_eq!(parsed.scheme(), "https");
    }
}
