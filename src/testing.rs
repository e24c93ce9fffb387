//! Test doubles: an in-memory broker and a local webhook stub.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{header::CONTENT_TYPE, HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use futures::stream::{self, BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::broker::{
    pump_messages, topic_path, AckHandle, Broker, InboundMessage, MessageHandler,
};

/// In-memory broker. Each `receive` call delivers the queued messages for its
/// subscription, then blocks until cancelled, like a real streaming pull.
/// A subscription marked with `failing_receive` ends its stream instead.
#[derive(Default)]
pub struct FakeBroker {
    subscriptions: Vec<(String, String)>,
    queued: Mutex<HashMap<String, Vec<Vec<u8>>>>,
    listing_failures: AtomicUsize,
    fail_config: Option<String>,
    fail_receive: Option<String>,
    started: Mutex<Vec<String>>,
    acked: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subscription(mut self, id: &str, project: &str, topic: &str) -> Self {
        self.subscriptions
            .push((id.to_string(), topic_path(project, topic)));
        self
    }

    pub fn with_message(self, subscription: &str, data: &[u8]) -> Self {
        self.queued
            .lock()
            .unwrap()
            .entry(subscription.to_string())
            .or_default()
            .push(data.to_vec());
        self
    }

    /// Fail the next `times` listings, then list normally
    pub fn failing_listing(self, times: usize) -> Self {
        self.listing_failures.store(times, Ordering::SeqCst);
        self
    }

    pub fn failing_config(mut self, subscription: &str) -> Self {
        self.fail_config = Some(subscription.to_string());
        self
    }

    pub fn failing_receive(mut self, subscription: &str) -> Self {
        self.fail_receive = Some(subscription.to_string());
        self
    }

    /// Subscriptions whose receive loop has started, in start order
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn acked(&self) -> Vec<(String, Vec<u8>)> {
        self.acked.lock().unwrap().clone()
    }

    /// Poll until `count` messages are acked, panicking after a few seconds.
    pub async fn wait_for_acks(&self, count: usize) {
        for _ in 0..200 {
            if self.acked.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "expected {} acks, got {}",
            count,
            self.acked.lock().unwrap().len()
        );
    }
}

struct RecordingAck {
    subscription: String,
    data: Vec<u8>,
    acked: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

#[async_trait]
impl AckHandle for RecordingAck {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.acked
            .lock()
            .unwrap()
            .push((self.subscription, self.data));
        Ok(())
    }
}

#[async_trait]
impl Broker for FakeBroker {
    fn list_subscriptions(&self) -> BoxStream<'_, Result<String>> {
        let failing = self
            .listing_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return stream::iter([Err(anyhow::anyhow!("listing unavailable"))]).boxed();
        }
        stream::iter(self.subscriptions.iter().map(|(id, _)| Ok(id.clone()))).boxed()
    }

    async fn bound_topic(&self, subscription: &str) -> Result<String> {
        if self.fail_config.as_deref() == Some(subscription) {
            anyhow::bail!("config unavailable for {}", subscription);
        }
        self.subscriptions
            .iter()
            .find(|(id, _)| id == subscription)
            .map(|(_, topic)| topic.clone())
            .ok_or_else(|| anyhow::anyhow!("no such subscription: {}", subscription))
    }

    async fn receive(
        &self,
        subscription: &str,
        handler: Arc<dyn MessageHandler>,
        cancel: CancellationToken,
    ) -> Result<()> {
        self.started.lock().unwrap().push(subscription.to_string());

        let queued = self
            .queued
            .lock()
            .unwrap()
            .remove(subscription)
            .unwrap_or_default();
        let owner = subscription.to_string();
        let acked = self.acked.clone();
        let delivered = stream::iter(queued).map(move |data| {
            let acker = RecordingAck {
                subscription: owner.clone(),
                data: data.clone(),
                acked: acked.clone(),
            };
            InboundMessage::new(data, Box::new(acker))
        });

        let mut messages = if self.fail_receive.as_deref() == Some(subscription) {
            delivered.boxed()
        } else {
            delivered.chain(stream::pending()).boxed()
        };
        pump_messages(subscription, &mut messages, handler.as_ref(), &cancel).await
    }
}

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

pub struct WebhookStub {
    pub url: String,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

impl WebhookStub {
    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// Serve a webhook on an ephemeral local port that records every POST to
/// `/hook` and answers with `status` and `body`.
pub async fn spawn_webhook(status: StatusCode, body: &'static str) -> WebhookStub {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let captured = requests.clone();

    let app = Router::new().route(
        "/hook",
        post(move |headers: HeaderMap, payload: Bytes| {
            let captured = captured.clone();
            async move {
                captured.lock().unwrap().push(CapturedRequest {
                    content_type: headers
                        .get(CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string),
                    body: payload.to_vec(),
                });
                (status, body)
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    WebhookStub {
        url: format!("http://{}/hook", addr),
        requests,
    }
}
