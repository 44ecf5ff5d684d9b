use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use reqwest::{header::HeaderMap, Client, Method, Request, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;

use crate::app_state::AppError;

/// HTTP client for one external provider. In-flight concurrency is bounded
/// by a permit pool and every started request keeps its permit for the
/// pacing interval, so at most `concurrency` requests begin per interval.
/// Clones share the same budget.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    key: &'static str,
    client: Client,
    permits: Arc<Semaphore>,
    pace: Duration,
}

impl ProviderClient {
    pub fn new(key: &'static str, concurrency: usize, pace: Duration, timeout: Duration) -> Self {
        Self::with_default_headers(key, concurrency, pace, timeout, HeaderMap::new())
    }

    /// Client with the provider's credential headers baked into every
    /// request.
    pub fn with_default_headers(
        key: &'static str,
        concurrency: usize,
        pace: Duration,
        timeout: Duration,
        headers: HeaderMap,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .expect("reqwest client to build");
        Self {
            key,
            client,
            permits: Arc::new(Semaphore::new(concurrency)),
            pace,
        }
    }

    pub async fn get_json<T>(&self, url: Url) -> Result<T, AppError>
    where
        T: DeserializeOwned,
    {
        let response = self.execute(Request::new(Method::GET, url)).await?;
        self.decode(response).await
    }

    /// Fetch where only the status matters.
    pub async fn get_ok(&self, url: Url) -> Result<(), AppError> {
        self.execute(Request::new(Method::GET, url)).await?;
        Ok(())
    }

    pub async fn post_form<T>(&self, url: Url, form: &[(&str, &str)]) -> Result<T, AppError>
    where
        T: DeserializeOwned,
    {
        let response = self.execute(self.form_request(url, form)?).await?;
        self.decode(response).await
    }

    pub async fn post_form_ok(&self, url: Url, form: &[(&str, &str)]) -> Result<(), AppError> {
        self.execute(self.form_request(url, form)?).await?;
        Ok(())
    }

    fn form_request(&self, url: Url, form: &[(&str, &str)]) -> Result<Request, AppError> {
        self.client
            .post(url)
            .form(form)
            .build()
            .map_err(|e| AppError::internal_error(format!("bad form request: {e}")))
    }

    async fn execute(&self, request: Request) -> Result<Response, AppError> {
        let url = request.url().to_string();
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .expect("provider permit pool never closes");
        tracing::trace!(provider = self.key, "Sending request: {url}");
        let result = self.client.execute(request).await;
        // the permit frees once the pacing interval has passed, not when
        // the response lands
        let pace = self.pace;
        tokio::spawn(async move {
            tokio::time::sleep(pace).await;
            drop(permit);
        });
        let response = result.map_err(|e| {
            tracing::error!(provider = self.key, "Request to {url} failed: {e}");
            AppError::internal_error(format!("request failed: {e}"))
        })?;
        tracing::trace!(
            provider = self.key,
            status = response.status().as_u16(),
            url,
            "Provider response"
        );
        check_status(response.status())?;
        Ok(response)
    }

    async fn decode<T>(&self, response: Response) -> Result<T, AppError>
    where
        T: DeserializeOwned,
    {
        let url = response.url().to_string();
        match response.json().await {
            Ok(out) => Ok(out),
            Err(e) => {
                tracing::error!(
                    provider = self.key,
                    url,
                    "Failed to deserialize provider response: {e}"
                );
                Err(AppError::internal_error(
                    "failed to deserialize response json body",
                ))
            }
        }
    }
}

fn check_status(status: StatusCode) -> Result<(), AppError> {
    if status.is_success() {
        return Ok(());
    }
    match status.as_u16() {
        404 => Err(AppError::not_found("provider responded with 404")),
        429 => Err(AppError::rate_limited("provider responded with 429")),
        rest => Err(AppError::internal_error(format!(
            "provider responded with status {rest}"
        ))),
    }
}

/// Windowed call budget for a provider. Soft limiters report exhaustion so
/// the caller yields empty; hard limiters are expected to bubble the error
/// up so the bus reschedules after the window.
#[derive(Debug)]
pub struct RateLimiter {
    max_calls: u32,
    period: Duration,
    state: Mutex<LimiterWindow>,
}

#[derive(Debug)]
struct LimiterWindow {
    window_start: Instant,
    calls: u32,
}

impl RateLimiter {
    pub fn new(max_calls: u32, period: Duration) -> Self {
        Self {
            max_calls,
            period,
            state: Mutex::new(LimiterWindow {
                window_start: Instant::now(),
                calls: 0,
            }),
        }
    }

    /// Take one call out of the current window.
    pub fn try_acquire(&self) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        if now.duration_since(state.window_start) >= self.period {
            state.window_start = now;
            state.calls = 0;
        }
        if state.calls >= self.max_calls {
            return Err(AppError::rate_limited("local call budget exhausted"));
        }
        state.calls += 1;
        Ok(())
    }

    /// Record an externally reported limit hit, exhausting the window.
    pub fn limit_hit(&self) {
        let mut state = self.state.lock().unwrap();
        state.window_start = Instant::now();
        state.calls = self.max_calls;
    }

    /// Time until the current window opens again.
    pub fn retry_after(&self) -> Duration {
        let state = self.state.lock().unwrap();
        if state.calls < self.max_calls {
            return Duration::ZERO;
        }
        self.period
            .saturating_sub(state.window_start.elapsed())
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

#[cfg(test)]
mod tests {
    use crate::app_state::AppErrorKind;

    use super::*;

    #[test]
    fn status_mapping_distinguishes_error_classes() {
        assert!(check_status(StatusCode::OK).is_ok());
        assert!(check_status(StatusCode::CREATED).is_ok());
        assert_eq!(
            check_status(StatusCode::NOT_FOUND).unwrap_err().kind,
            AppErrorKind::NotFound
        );
        assert_eq!(
            check_status(StatusCode::TOO_MANY_REQUESTS).unwrap_err().kind,
            AppErrorKind::RateLimited
        );
        assert_eq!(
            check_status(StatusCode::INTERNAL_SERVER_ERROR)
                .unwrap_err()
                .kind,
            AppErrorKind::InternalError
        );
    }

    #[tokio::test]
    async fn pacing_holds_permits_for_the_interval() {
        // with one permit and a long pace the second acquire must wait
        let client = ProviderClient::new(
            "test",
            1,
            Duration::from_secs(30),
            Duration::from_secs(1),
        );
        let first = client.permits.clone().acquire_owned().await.unwrap();
        let pace = client.pace;
        tokio::spawn(async move {
            tokio::time::sleep(pace).await;
            drop(first);
        });
        let second = tokio::time::timeout(
            Duration::from_millis(50),
            client.permits.clone().acquire_owned(),
        )
        .await;
        assert!(second.is_err(), "permit must stay held for the pace interval");
    }

    #[test]
    fn limiter_exhausts_and_reopens() {
        let limiter = RateLimiter::new(2, Duration::from_millis(20));
        assert!(limiter.try_acquire().is_ok());
        assert!(limiter.try_acquire().is_ok());
        assert!(limiter.try_acquire().is_err());
        std::thread::sleep(Duration::from_millis(25));
        assert!(limiter.try_acquire().is_ok());
    }

    #[test]
    fn limit_hit_blocks_rest_of_window() {
        let limiter = RateLimiter::new(10, Duration::from_secs(60));
        limiter.limit_hit();
        assert!(limiter.try_acquire().is_err());
        assert!(limiter.retry_after() > Duration::from_secs(50));
    }
}
