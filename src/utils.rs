use anyhow::{anyhow, Context};
use reqwest::Url;
use std::str::FromStr;

/// Timeout for the liveness probe. Kept short so connectivity diagnostics
/// stay snappy.
pub const HEALTH_TIMEOUT_SECS: u64 = 3;

lazy_static! {
    /// Address of the conversion service, overridable through the
    /// environment. Every other URL the client builds derives from this.
    pub static ref SERVICE_URL: String = {
        match std::env::var("PAGEFORGE_API_URL") {
            Ok(url) if !url.is_empty() => url.trim_end_matches('/').to_string(),
            _ => "http://localhost:8000".into(),
        }
    };
}

/// Validates a user-supplied target URL before anything is sent to the
/// service: absolute, http(s) and with a host.
pub fn parse_target_url(url: &str) -> anyhow::Result<Url> {
    let u = Url::from_str(url).context(format!("url passed is invalid {}", url))?;

    match u.scheme() {
        "http" | "https" => {}
        other => return Err(anyhow!("url must use http or https, got {}", other)),
    }
    if u.host_str().is_none() {
        return Err(anyhow!("url must have a valid host"));
    }

    Ok(u)
}
