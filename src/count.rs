use tracing::{info, warn};

use crate::parse::decode_count;
use crate::request::{Endpoint, RetryPolicy};

/// Asks the endpoint how many rows the dataset holds.
#[derive(Debug, Clone)]
pub struct CountEstimator {
    endpoint: Endpoint,
    retry: RetryPolicy,
}

impl CountEstimator {
    pub fn new(endpoint: Endpoint, retry: RetryPolicy) -> Self {
        Self { endpoint, retry }
    }

    /// Issues `$select=count(*)`. Returns 0 when the count can't be obtained.
    pub async fn get_total_count(&self) -> u64 {
        let query = [("$select", "count(*)".to_string())];
        match self
            .endpoint
            .get_with_retry("total count", &query, self.retry, decode_count)
            .await
        {
            Ok(count) => count,
            Err(failure) => {
                warn!(%failure, "Couldn't fetch total count");
                0
            }
        }
    }
}

/// Substitutes `fallback` for a count that couldn't be obtained.
pub fn total_or_estimate(count: u64, fallback: u64) -> u64 {
    if count == 0 {
        info!("Failed to fetch total count. Using an estimated upper limit of {fallback} rows.");
        fallback
    } else {
        count
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use serde_json::json;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::DEFAULT_FALLBACK_ROWS;

    fn estimator(uri: &str) -> CountEstimator {
        let endpoint = Endpoint::new(uri, Duration::from_secs(5)).unwrap();
        CountEstimator::new(endpoint, RetryPolicy::new(3, Duration::from_millis(10)))
    }

    #[tokio::test]
    async fn parses_count_from_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("$select", "count(*)"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"count": "12345"}])))
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(estimator(&server.uri()).get_total_count().await, 12345);
    }

    #[tokio::test]
    async fn failing_count_falls_back_to_estimate() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let count = estimator(&server.uri()).get_total_count().await;

        assert_eq!(count, 0);
        assert_eq!(total_or_estimate(count, DEFAULT_FALLBACK_ROWS), 50_000);
    }

    #[tokio::test]
    async fn rate_limited_count_retries_up_to_ceiling() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .expect(3)
            .mount(&server)
            .await;

        assert_eq!(estimator(&server.uri()).get_total_count().await, 0);
    }

    #[tokio::test]
    async fn malformed_count_body_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"count": 9}])))
            .mount(&server)
            .await;

        assert_eq!(estimator(&server.uri()).get_total_count().await, 9);
    }

    #[tokio::test]
    async fn unreachable_endpoint_backs_off_and_returns_zero() {
        // Bind then drop to get a port nobody listens on.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let start = Instant::now();
        let count = estimator(&format!("http://127.0.0.1:{port}/"))
            .get_total_count()
            .await;

        // 10ms + 20ms between the three attempts
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(count, 0);
    }

    #[test]
    fn known_count_is_kept() {
        assert_eq!(total_or_estimate(2500, DEFAULT_FALLBACK_ROWS), 2500);
    }
}
