use reqwest::Client;

use crate::error::ResolveError;

pub async fn fetch_bytes(http: &Client, url: &str) -> Result<Vec<u8>, ResolveError> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|error| ResolveError::upstream(url, error))?;

    if !response.status().is_success() {
        return Err(ResolveError::upstream(
            url,
            format!("request failed ({})", response.status()),
        ));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|error| ResolveError::upstream(url, format!("failed to read body: {error}")))?;
    Ok(bytes.to_vec())
}

pub async fn fetch_text(http: &Client, url: &str) -> Result<String, ResolveError> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|error| ResolveError::upstream(url, error))?;

    if !response.status().is_success() {
        return Err(ResolveError::upstream(
            url,
            format!("request failed ({})", response.status()),
        ));
    }

    response
        .text()
        .await
        .map_err(|error| ResolveError::upstream(url, format!("failed to read text body: {error}")))
}
