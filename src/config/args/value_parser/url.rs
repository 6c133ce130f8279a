use url::Url;

const INVALID_SCHEME: &str = "URL scheme must be https:// or http://";

/// Accept only http(s) service endpoints.
pub fn check_scheme(url: &str) -> Result<String, String> {
    let parsed = Url::parse(url).map_err(|e| e.to_string())?;

    if parsed.scheme() != "https" && parsed.scheme() != "http" {
        return Err(INVALID_SCHEME.to_string());
    }
    if parsed.host_str().is_none() {
        return Err(format!("URL has no host: {url}"));
    }

    Ok(url.to_string())
}
