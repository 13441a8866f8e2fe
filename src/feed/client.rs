use async_stream::stream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use reqwest::header;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::PdpConfig;
use crate::domain::{Decision, MultiSubscription, Subscription};

use super::backoff::Backoff;
use super::dedup::{DecisionDeduper, MultiDeduper};
use super::framing::{event_payload, LineFramer};
use super::{DecisionMap, IdentifiableDecision, PolicyDecisionPoint};

/// What the low-level feed loop hands to the decision parsers.
enum FeedEvent {
    /// One complete frame payload (framing noise already stripped).
    Payload(String),
    /// The connection ended or failed; decisions must fail closed.
    Disconnect,
}

/// HTTP client for the PDP decision API.
///
/// Request/response decisions fail closed to `Indeterminate`; streaming
/// decisions reconnect with jittered exponential backoff and suppress
/// consecutive duplicates. Transport trouble never escapes this type as
/// an error.
#[derive(Clone)]
pub struct PdpClient {
    http: reqwest::Client,
    backoff: Backoff,
    config: Arc<PdpConfig>,
}

impl PdpClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns the underlying error when the HTTP client cannot be
    /// constructed (TLS backend initialization, for instance).
    pub fn new(config: PdpConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().build()?;
        let backoff = Backoff::new(config.backoff_base(), config.backoff_max());
        Ok(PdpClient {
            http,
            backoff,
            config: Arc::new(config),
        })
    }

    /// One decision for one subscription, fail-closed.
    ///
    /// Any failure mode — connect error, timeout, non-2xx status,
    /// unparsable or non-object body, invalid verdict — yields
    /// `Indeterminate`, never an error.
    pub async fn decide_once(&self, subscription: &Subscription) -> Decision {
        match self.try_decide_once(subscription).await {
            Ok(decision) => decision,
            Err(err) => {
                warn!(error = %err, "decide-once failed, failing closed");
                Decision::indeterminate()
            }
        }
    }

    /// Infinite decision stream for one subscription.
    ///
    /// Reconnects on loss with backoff; emits one `Indeterminate` per
    /// disconnect; suppresses consecutive structural duplicates. Ends only
    /// when the configured retry budget is exhausted.
    pub fn decide(&self, subscription: &Subscription) -> impl Stream<Item = Decision> + Send + 'static {
        let events = self.raw_events("decide", subscription.clone());
        stream! {
            let mut dedup = DecisionDeduper::new();
            for await event in events {
                let decision = match event {
                    FeedEvent::Payload(payload) => parse_decision(&payload),
                    FeedEvent::Disconnect => Decision::indeterminate(),
                };
                if dedup.accept(&decision) {
                    yield decision;
                }
            }
        }
    }

    /// Snapshot of decisions for every subscription in the batch,
    /// fail-closed per id: ids the PDP did not answer come back
    /// `Indeterminate`.
    pub async fn multi_decide_all_once(&self, multi: &MultiSubscription) -> DecisionMap {
        match self.try_multi_decide_all_once(multi).await {
            Ok(mut map) => {
                for id in multi.ids() {
                    map.entry(id.to_string())
                        .or_insert_with(Decision::indeterminate);
                }
                map
            }
            Err(err) => {
                warn!(error = %err, "multi decide-once failed, failing closed");
                indeterminate_map(multi)
            }
        }
    }

    /// Per-id decision deltas for a subscription batch. A frame that
    /// cannot be parsed fails every id closed, since its target id is
    /// unknowable.
    pub fn multi_decide(
        &self,
        multi: &MultiSubscription,
    ) -> impl Stream<Item = IdentifiableDecision> + Send + 'static {
        let ids: Vec<String> = multi.ids().map(str::to_string).collect();
        let events = self.raw_events("multi-decide", multi.clone());
        stream! {
            let mut dedup = MultiDeduper::new();
            for await event in events {
                match event {
                    FeedEvent::Payload(payload) => {
                        match serde_json::from_str::<IdentifiableDecision>(&payload) {
                            Ok(delta) => {
                                if dedup.accept(&delta.id, &delta.decision) {
                                    yield delta;
                                }
                            }
                            Err(err) => {
                                warn!(error = %err, "unparsable multi-decision event, failing all ids closed");
                                for delta in fail_all(&ids, &mut dedup) {
                                    yield delta;
                                }
                            }
                        }
                    }
                    FeedEvent::Disconnect => {
                        for delta in fail_all(&ids, &mut dedup) {
                            yield delta;
                        }
                    }
                }
            }
        }
    }

    /// Full-snapshot stream for a subscription batch; consecutive
    /// identical snapshots are suppressed.
    pub fn multi_decide_all(
        &self,
        multi: &MultiSubscription,
    ) -> impl Stream<Item = DecisionMap> + Send + 'static {
        let fallback = indeterminate_map(multi);
        let events = self.raw_events("multi-decide-all", multi.clone());
        stream! {
            let mut dedup = MultiDeduper::new();
            for await event in events {
                let snapshot = match event {
                    FeedEvent::Payload(payload) => {
                        match serde_json::from_str::<DecisionMap>(&payload) {
                            Ok(map) => map,
                            Err(err) => {
                                warn!(error = %err, "unparsable decision snapshot, failing closed");
                                fallback.clone()
                            }
                        }
                    }
                    FeedEvent::Disconnect => fallback.clone(),
                };
                if dedup.accept_map(&snapshot) {
                    yield snapshot;
                }
            }
        }
    }

    async fn try_decide_once(&self, subscription: &Subscription) -> anyhow::Result<Decision> {
        let response = self
            .request("decide-once")
            .timeout(self.config.request_timeout())
            .json(subscription)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<Decision>().await?)
    }

    async fn try_multi_decide_all_once(
        &self,
        multi: &MultiSubscription,
    ) -> anyhow::Result<DecisionMap> {
        let response = self
            .request("multi-decide-all-once")
            .timeout(self.config.request_timeout())
            .json(multi)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<DecisionMap>().await?)
    }

    /// The shared transport loop: connect, reassemble frames, surface
    /// payloads, mark disconnects, back off, reconnect. Ends only when the
    /// retry budget is exhausted.
    fn raw_events<B>(&self, path: &'static str, body: B) -> impl Stream<Item = FeedEvent> + Send + 'static
    where
        B: Serialize + Send + Sync + 'static,
    {
        let client = self.clone();
        stream! {
            let mut attempt: u32 = 0;
            loop {
                match client.open_stream(path, &body).await {
                    Ok(mut chunks) => {
                        let mut framer = LineFramer::new(client.config.max_frame_bytes);
                        let mut delivered = false;
                        loop {
                            let Some(chunk) = chunks.next().await else {
                                info!(path, "decision stream closed by server");
                                break;
                            };
                            let bytes = match chunk {
                                Ok(bytes) => bytes,
                                Err(err) => {
                                    warn!(path, error = %err, "decision stream transport error");
                                    break;
                                }
                            };
                            let frames = match framer.push(&bytes) {
                                Ok(frames) => frames,
                                Err(err) => {
                                    warn!(path, error = %err, "oversized frame, dropping connection");
                                    break;
                                }
                            };
                            for frame in frames {
                                let Some(payload) = event_payload(&frame) else {
                                    continue;
                                };
                                delivered = true;
                                yield FeedEvent::Payload(payload.to_string());
                            }
                        }
                        // A connection that produced events earns a fresh
                        // retry budget; connect-then-close loops do not.
                        if delivered {
                            attempt = 0;
                        }
                    }
                    Err(err) => {
                        warn!(path, error = %err, "failed to open decision stream");
                    }
                }

                yield FeedEvent::Disconnect;

                attempt += 1;
                if client
                    .config
                    .max_retries
                    .is_some_and(|budget| attempt > budget)
                {
                    warn!(path, attempt, "retry budget exhausted, ending decision stream");
                    return;
                }
                let delay = client.backoff.delay(attempt);
                if attempt > client.config.retry_warn_threshold {
                    warn!(path, attempt, delay_ms = delay.as_millis() as u64, "reconnecting to PDP");
                } else {
                    info!(path, attempt, delay_ms = delay.as_millis() as u64, "reconnecting to PDP");
                }
                tokio::time::sleep(delay).await;
            }
        }
    }

    async fn open_stream<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> anyhow::Result<BoxStream<'static, reqwest::Result<Bytes>>> {
        let response = self
            .request(path)
            .header(
                header::ACCEPT,
                "application/x-ndjson, text/event-stream",
            )
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes_stream().boxed())
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);
        let mut builder = self.http.post(url);
        if let Some(token) = &self.config.bearer_token {
            builder = builder.bearer_auth(token);
        } else if let (Some(user), Some(password)) = (&self.config.username, &self.config.password)
        {
            builder = builder.basic_auth(user, Some(password));
        }
        builder
    }
}

#[async_trait]
impl PolicyDecisionPoint for PdpClient {
    async fn decide_once(&self, subscription: &Subscription) -> Decision {
        PdpClient::decide_once(self, subscription).await
    }

    fn decide(&self, subscription: &Subscription) -> BoxStream<'static, Decision> {
        PdpClient::decide(self, subscription).boxed()
    }
}

fn parse_decision(payload: &str) -> Decision {
    match serde_json::from_str::<Decision>(payload) {
        Ok(decision) => decision,
        Err(err) => {
            warn!(error = %err, "unparsable decision event, failing closed");
            Decision::indeterminate()
        }
    }
}

fn indeterminate_map(multi: &MultiSubscription) -> DecisionMap {
    multi
        .ids()
        .map(|id| (id.to_string(), Decision::indeterminate()))
        .collect()
}

fn fail_all(ids: &[String], dedup: &mut MultiDeduper) -> Vec<IdentifiableDecision> {
    let mut deltas = Vec::new();
    for id in ids {
        let decision = Decision::indeterminate();
        if dedup.accept(id, &decision) {
            deltas.push(IdentifiableDecision {
                id: id.clone(),
                decision,
            });
        }
    }
    deltas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Verdict;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    fn config_for(server: &MockServer) -> PdpConfig {
        PdpConfig {
            base_url: format!("{}/api/pdp", server.base_url()),
            backoff_base_ms: 1,
            backoff_max_ms: 5,
            max_retries: Some(0),
            ..PdpConfig::default()
        }
    }

    fn client_for(server: &MockServer) -> PdpClient {
        PdpClient::new(config_for(server)).unwrap()
    }

    fn subscription() -> Subscription {
        Subscription::new("alice", "read", "report")
    }

    #[tokio::test]
    async fn test_decide_once_parses_decision() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/pdp/decide-once")
                    .json_body(json!({
                        "subject": "alice",
                        "action": "read",
                        "resource": "report",
                    }));
                then.status(200).json_body(json!({
                    "decision": "PERMIT",
                    "obligations": [{"type": "log_access"}],
                }));
            })
            .await;

        let decision = client_for(&server).decide_once(&subscription()).await;

        mock.assert_async().await;
        assert!(decision.verdict.is_permit());
        assert_eq!(decision.obligations.len(), 1);
    }

    #[tokio::test]
    async fn test_decide_once_fail_closed_on_5xx() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/pdp/decide-once");
                then.status(500);
            })
            .await;

        let decision = client_for(&server).decide_once(&subscription()).await;
        assert_eq!(decision.verdict, Verdict::Indeterminate);
    }

    #[tokio::test]
    async fn test_decide_once_fail_closed_on_garbage() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/pdp/decide-once");
                then.status(200).body("[1,2,3]");
            })
            .await;

        let decision = client_for(&server).decide_once(&subscription()).await;
        assert_eq!(decision.verdict, Verdict::Indeterminate);
    }

    #[tokio::test]
    async fn test_decide_once_fail_closed_on_invalid_verdict() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/pdp/decide-once");
                then.status(200).json_body(json!({"decision": "MAYBE"}));
            })
            .await;

        let decision = client_for(&server).decide_once(&subscription()).await;
        assert_eq!(decision.verdict, Verdict::Indeterminate);
    }

    #[tokio::test]
    async fn test_decide_once_fail_closed_on_timeout() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/pdp/decide-once");
                then.status(200)
                    .json_body(json!({"decision": "PERMIT"}))
                    .delay(Duration::from_millis(250));
            })
            .await;

        let mut config = config_for(&server);
        config.request_timeout_ms = 50;
        let client = PdpClient::new(config).unwrap();

        let decision = client.decide_once(&subscription()).await;
        assert_eq!(decision.verdict, Verdict::Indeterminate);
    }

    #[tokio::test]
    async fn test_decide_once_never_leaks_a_permit_on_unreachable_pdp() {
        let config = PdpConfig {
            base_url: "http://127.0.0.1:1/api/pdp".to_string(),
            request_timeout_ms: 100,
            ..PdpConfig::default()
        };
        let client = PdpClient::new(config).unwrap();

        let decision = client.decide_once(&subscription()).await;
        assert_eq!(decision.verdict, Verdict::Indeterminate);
    }

    #[tokio::test]
    async fn test_decide_once_sends_bearer_auth() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/pdp/decide-once")
                    .header("authorization", "Bearer secret-token");
                then.status(200).json_body(json!({"decision": "PERMIT"}));
            })
            .await;

        let mut config = config_for(&server);
        config.bearer_token = Some("secret-token".to_string());
        let client = PdpClient::new(config).unwrap();

        let decision = client.decide_once(&subscription()).await;
        mock.assert_async().await;
        assert!(decision.verdict.is_permit());
    }

    #[tokio::test]
    async fn test_decide_stream_frames_and_fail_closed_tail() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/pdp/decide");
                then.status(200).body(concat!(
                    "{\"decision\":\"PERMIT\"}\n",
                    ": keep-alive\n",
                    "data: {\"decision\":\"DENY\"}\n",
                    "this is not json\n",
                ));
            })
            .await;

        let client = client_for(&server);
        let decisions: Vec<Decision> = client.decide(&subscription()).collect().await;

        let verdicts: Vec<Verdict> = decisions.iter().map(|d| d.verdict).collect();
        // Parse failure fails closed; the end-of-stream Indeterminate is a
        // consecutive duplicate of it and stays suppressed.
        assert_eq!(
            verdicts,
            vec![Verdict::Permit, Verdict::Deny, Verdict::Indeterminate]
        );
    }

    #[tokio::test]
    async fn test_decide_stream_suppresses_duplicates() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/pdp/decide");
                then.status(200).body(concat!(
                    "{\"decision\":\"PERMIT\"}\n",
                    "{\"decision\":\"PERMIT\"}\n",
                    "{\"decision\":\"DENY\"}\n",
                    "{\"decision\":\"DENY\"}\n",
                    "{\"decision\":\"PERMIT\"}\n",
                ));
            })
            .await;

        let client = client_for(&server);
        let decisions: Vec<Decision> = client.decide(&subscription()).collect().await;

        let verdicts: Vec<Verdict> = decisions.iter().map(|d| d.verdict).collect();
        assert_eq!(
            verdicts,
            vec![
                Verdict::Permit,
                Verdict::Deny,
                Verdict::Permit,
                Verdict::Indeterminate,
            ]
        );
    }

    #[tokio::test]
    async fn test_decide_stream_reconnects_until_budget_exhausted() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/pdp/decide");
                then.status(200).body("");
            })
            .await;

        let mut config = config_for(&server);
        config.max_retries = Some(1);
        let client = PdpClient::new(config).unwrap();

        let decisions: Vec<Decision> = client.decide(&subscription()).collect().await;

        // Two connections: initial attempt plus one retry.
        assert_eq!(mock.hits_async().await, 2);
        // Both disconnects fail closed, the second one deduplicated.
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].verdict, Verdict::Indeterminate);
    }

    #[tokio::test]
    async fn test_multi_decide_all_once_fills_missing_ids() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/pdp/multi-decide-all-once");
                then.status(200)
                    .json_body(json!({"a": {"decision": "PERMIT"}}));
            })
            .await;

        let multi = MultiSubscription::new()
            .with("a", subscription())
            .with("b", subscription());
        let map = client_for(&server).multi_decide_all_once(&multi).await;

        assert_eq!(map["a"].verdict, Verdict::Permit);
        assert_eq!(map["b"].verdict, Verdict::Indeterminate);
    }

    #[tokio::test]
    async fn test_multi_decide_all_once_fail_closed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/pdp/multi-decide-all-once");
                then.status(503);
            })
            .await;

        let multi = MultiSubscription::new()
            .with("a", subscription())
            .with("b", subscription());
        let map = client_for(&server).multi_decide_all_once(&multi).await;

        assert_eq!(map.len(), 2);
        assert!(map.values().all(|d| d.verdict == Verdict::Indeterminate));
    }

    #[tokio::test]
    async fn test_multi_decide_deltas_and_poisoned_frame() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/pdp/multi-decide");
                then.status(200).body(concat!(
                    "{\"id\":\"a\",\"decision\":\"PERMIT\"}\n",
                    "{\"id\":\"b\",\"decision\":\"PERMIT\"}\n",
                    "garbage\n",
                ));
            })
            .await;

        let multi = MultiSubscription::new()
            .with("a", subscription())
            .with("b", subscription());
        let client = client_for(&server);
        let deltas: Vec<IdentifiableDecision> = client.multi_decide(&multi).collect().await;

        assert_eq!(deltas.len(), 4);
        assert_eq!(deltas[0].id, "a");
        assert!(deltas[0].decision.verdict.is_permit());
        assert_eq!(deltas[1].id, "b");
        // The unattributable frame fails both ids closed.
        assert!(deltas[2..]
            .iter()
            .all(|d| d.decision.verdict == Verdict::Indeterminate));
    }

    #[tokio::test]
    async fn test_multi_decide_all_snapshot_dedup() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/pdp/multi-decide-all");
                then.status(200).body(concat!(
                    "{\"a\":{\"decision\":\"PERMIT\"}}\n",
                    "{\"a\":{\"decision\":\"PERMIT\"}}\n",
                    "{\"a\":{\"decision\":\"DENY\"}}\n",
                ));
            })
            .await;

        let multi = MultiSubscription::new().with("a", subscription());
        let client = client_for(&server);
        let snapshots: Vec<DecisionMap> = client.multi_decide_all(&multi).collect().await;

        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[0]["a"].verdict, Verdict::Permit);
        assert_eq!(snapshots[1]["a"].verdict, Verdict::Deny);
        assert_eq!(snapshots[2]["a"].verdict, Verdict::Indeterminate);
    }
}
