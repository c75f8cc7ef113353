use std::time::Duration;

pub const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;
pub const DEFAULT_SYNC_RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the downstream reqwest client. Only the connect phase is bounded;
/// request duration is left to the client defaults.
pub fn make_http_client() -> reqwest::Client {
    match reqwest::Client::builder().connect_timeout(CONNECT_TIMEOUT).build() {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(error = %e, "falling back to default reqwest client");
            reqwest::Client::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_client() {
        let _client = make_http_client();
    }

    #[test]
    fn defaults_are_sane() {
        assert_eq!(DEFAULT_MAX_BODY_BYTES, 4 * 1024 * 1024);
        assert!(DEFAULT_SYNC_RESPONSE_TIMEOUT >= Duration::from_secs(1));
    }
}
