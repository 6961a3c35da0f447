//! HTTP worker: one `POST` per job, with a five-step result
//! classification. Grounded on `dispatcher/worker/http.go`'s
//! `HTTPWorker.Work`.

use super::Worker;
use async_trait::async_trait;
use fireworq_core::{PersistentJob, ResultStatus, WorkResult};
use reqwest::Client;
use std::time::Duration;

fn default_user_agent() -> String {
    format!("Fireworq/{}", env!("CARGO_PKG_VERSION"))
}

/// Connection-pool knobs, set once at construction from configuration.
#[derive(Debug, Clone)]
pub struct HttpWorkerConfig {
    pub user_agent: Option<String>,
    pub keep_alive: bool,
    pub max_conns_per_host: usize,
    pub idle_conn_timeout: Option<Duration>,
}

impl Default for HttpWorkerConfig {
    fn default() -> Self {
        HttpWorkerConfig {
            user_agent: None,
            keep_alive: false,
            max_conns_per_host: 10,
            idle_conn_timeout: None,
        }
    }
}

pub struct HttpWorker {
    client: Client,
    user_agent: String,
}

impl HttpWorker {
    pub fn new(config: HttpWorkerConfig) -> Self {
        let mut builder = Client::builder().pool_max_idle_per_host(config.max_conns_per_host);
        builder = if config.keep_alive {
            builder.tcp_keepalive(Some(Duration::from_secs(60)))
        } else {
            builder.pool_max_idle_per_host(0)
        };
        if let Some(timeout) = config.idle_conn_timeout {
            builder = builder.pool_idle_timeout(Some(timeout));
        }
        let client = builder.build().unwrap_or_else(|_| Client::new());

        HttpWorker {
            client,
            user_agent: config.user_agent.unwrap_or_else(default_user_agent),
        }
    }
}

#[async_trait]
impl Worker for HttpWorker {
    async fn work(&self, job: &PersistentJob) -> WorkResult {
        let mut request = self
            .client
            .post(&job.url)
            .header("Content-Type", "application/json")
            .header("User-Agent", self.user_agent.as_str())
            .body(job.payload.clone());

        if job.timeout > 0 {
            request = request.timeout(Duration::from_secs(job.timeout as u64));
        }

        tracing::debug!(job_id = job.id, url = %job.url, "Dispatched via HTTP");

        // Step 1 & 2: construction / transport failures both surface
        // as reqwest::Error from `send()` here since reqwest builds
        // and sends lazily; both map to internal-failure.
        let response = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                return WorkResult::internal_failure(format!("Request failed: {e}"));
            }
        };

        let status_code = response.status().as_u16();

        // Step 3: body read failure.
        let body = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                return WorkResult {
                    status: ResultStatus::Failure,
                    code: status_code,
                    message: format!("Cannot read body: {e}"),
                };
            }
        };

        // Step 4 & 5: parse and classify.
        match serde_json::from_slice::<WorkResult>(&body) {
            Ok(mut result) if result.status.is_valid() => {
                result.code = status_code;
                result
            }
            Ok(_) | Err(_) => WorkResult {
                status: ResultStatus::Failure,
                code: status_code,
                message: format!(
                    "Cannot parse body as a recognized result: {}",
                    String::from_utf8_lossy(&body)
                ),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fireworq_core::JobStatus;
    use httpmock::{Method, MockServer};

    fn job(url: String) -> PersistentJob {
        PersistentJob {
            id: 1,
            category: "cat1".to_string(),
            url,
            payload: b"{\"n\":1}".to_vec(),
            status: JobStatus::Grabbed,
            created_at: 0,
            next_try: 0,
            timeout: 5,
            retry_count: 3,
            retry_delay: 1,
            fail_count: 0,
        }
    }

    #[tokio::test]
    async fn forwards_payload_bytes_unchanged() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(Method::POST).path("/").body("{\"n\":1}");
            then.status(200).body("{\"status\":\"success\"}");
        });

        let worker = HttpWorker::new(HttpWorkerConfig::default());
        let result = worker.work(&job(server.url("/"))).await;
        mock.assert();
        assert_eq!(result.status, ResultStatus::Success);
        assert_eq!(result.code, 200);
    }

    #[tokio::test]
    async fn non_json_body_is_a_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(Method::POST);
            then.status(200).body("not json");
        });

        let worker = HttpWorker::new(HttpWorkerConfig::default());
        let result = worker.work(&job(server.url("/"))).await;
        assert_eq!(result.status, ResultStatus::Failure);
        assert_eq!(result.code, 200);
    }

    #[tokio::test]
    async fn permanent_failure_status_is_classified() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(Method::POST);
            then.status(422).body("{\"status\":\"permanent-failure\"}");
        });

        let worker = HttpWorker::new(HttpWorkerConfig::default());
        let result = worker.work(&job(server.url("/"))).await;
        assert_eq!(result.status, ResultStatus::PermanentFailure);
        assert_eq!(result.code, 422);
    }

    #[tokio::test]
    async fn unreachable_worker_is_internal_failure() {
        let worker = HttpWorker::new(HttpWorkerConfig::default());
        let result = worker.work(&job("http://127.0.0.1:1".to_string())).await;
        assert_eq!(result.status, ResultStatus::InternalFailure);
    }
}
