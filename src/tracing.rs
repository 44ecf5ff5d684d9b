use std::convert::Infallible;
use std::fmt::{self};

use axum::response::sse::{Event, KeepAlive};
use axum::response::Sse;
use axum::Extension;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio_stream::{Stream, StreamExt};
use tracing::field::{Field, Visit};
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Debug)]
struct PublicTracerLayer {
    channel: broadcast::Sender<String>,
}

#[derive(Debug, Clone)]
pub struct LogChannel(pub broadcast::Sender<String>);

impl LogChannel {
    pub async fn into_sse_stream(
        Extension(channel): Extension<LogChannel>,
    ) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
        let receiver = channel.0.subscribe();
        let stream = tokio_stream::wrappers::BroadcastStream::new(receiver).map(|item| {
            if let Ok(item) = item {
                Ok(Event::default().data(item))
            } else {
                Ok(Event::default())
            }
        });

        Sse::new(stream).keep_alive(KeepAlive::default())
    }
}

impl PublicTracerLayer {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { channel: tx }
    }
}

struct JsonVisitor {
    value: Map<String, Value>,
}

impl JsonVisitor {
    fn new() -> Self {
        Self { value: Map::new() }
    }
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.value.insert(
            field.name().to_string(),
            Value::String(format!("{:?}", value)),
        );
    }
}

impl<S: Subscriber> Layer<S> for PublicTracerLayer {
    fn enabled(
        &self,
        metadata: &tracing::Metadata<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) -> bool {
        let target = metadata.target();
        let patterns = ["hyper", "mio", "notify", "sqlx", "reqwest"];
        !patterns.iter().any(|pattern| target.starts_with(pattern))
    }

    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let metadata = event.metadata();
        let mut visitor = JsonVisitor::new();
        let now = time::OffsetDateTime::now_utc().to_string();
        let level = metadata.level().to_string();
        event.record(&mut visitor);
        let json = serde_json::json!({
        "timestamp": now,
        "target": metadata.target(),
        "level": level,
        "name": metadata.name(),
        "fields": visitor.value
        });
        let _ = self.channel.send(serde_json::to_string(&json).unwrap());
    }
}

/// Daily log file next to the stdout output; the scheduler cleans old ones.
fn log_file() -> Option<std::fs::File> {
    let today = time::OffsetDateTime::now_utc().date();
    let name = format!(
        "media-fetcher-{:04}-{:02}-{:02}.log",
        today.year(),
        u8::from(today.month()),
        today.day()
    );
    let path = crate::config::AppResources::logs_dir().join(name);
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .ok()
}

pub fn init_tracer() -> LogChannel {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,media_fetcher=debug"));
    let sub = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .finish();
    let pub_tracer = PublicTracerLayer::new();
    let log_channel = LogChannel(pub_tracer.channel.clone());
    match log_file() {
        Some(file) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(std::sync::Arc::new(file));
            sub.with(pub_tracer).with(file_layer).init();
        }
        None => sub.with(pub_tracer).init(),
    }
    log_channel
}
