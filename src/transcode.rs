//! Live SSE transcoding from Anthropic / Responses streams to Chat Completions chunks.
//!
//! A [`Transcoder`] maps one parsed upstream event to zero or more outgoing
//! frames. [`TranscodeStream`] drives it over the upstream body: it pulls
//! bytes only when the client polls, never buffers more than the events of
//! the chunk in hand, and finishes the request tracker when the stream ends
//! or the client goes away.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, error};

use crate::conversion::map_stop_reason;
use crate::models::anthropic::StreamEvent as AnthropicEvent;
use crate::models::chat::ChatCompletionChunk;
use crate::models::responses::StreamEvent as ResponsesEvent;
use crate::sse::{encode_done, encode_sse, SseEvent, SseParser};
use crate::stats::{RequestTracker, TokenUsage};

pub type ByteStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The terminal event was seen; stop reading upstream.
    Done,
}

pub trait Transcoder: Send + Unpin {
    fn on_event(&mut self, event: &SseEvent, out: &mut VecDeque<Bytes>) -> Flow;

    /// Token usage observed so far.
    fn usage(&self) -> Option<TokenUsage>;
}

fn push_frame<T: Serialize>(out: &mut VecDeque<Bytes>, payload: &T) {
    match encode_sse(payload) {
        Ok(frame) => out.push_back(frame),
        Err(e) => error!("Failed to encode chunk: {}", e),
    }
}

/// Anthropic Messages events → chat chunks. Every chunk carries the upstream message id.
#[derive(Debug, Default)]
pub struct AnthropicTranscoder {
    model: String,
    message_id: String,
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

impl AnthropicTranscoder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }
}

impl Transcoder for AnthropicTranscoder {
    fn on_event(&mut self, event: &SseEvent, out: &mut VecDeque<Bytes>) -> Flow {
        let parsed = match AnthropicEvent::parse(&event.event, &event.data) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(event = %event.event, "Skipping malformed Anthropic event: {}", e);
                return Flow::Continue;
            }
        };

        match parsed {
            AnthropicEvent::MessageStart { id, input_tokens } => {
                self.message_id = id;
                self.input_tokens = input_tokens.or(self.input_tokens);
                push_frame(out, &ChatCompletionChunk::role(&self.message_id, &self.model));
            }
            AnthropicEvent::ContentBlockDelta { text: Some(text) } if !text.is_empty() => {
                push_frame(
                    out,
                    &ChatCompletionChunk::content(&self.message_id, &self.model, text),
                );
            }
            AnthropicEvent::MessageDelta {
                stop_reason,
                output_tokens,
            } => {
                self.output_tokens = output_tokens.or(self.output_tokens);
                let reason = map_stop_reason(stop_reason.as_deref().unwrap_or("end_turn"));
                push_frame(
                    out,
                    &ChatCompletionChunk::finish(&self.message_id, &self.model, reason),
                );
            }
            AnthropicEvent::MessageStop => {
                out.push_back(encode_done());
                return Flow::Done;
            }
            AnthropicEvent::ContentBlockDelta { .. }
            | AnthropicEvent::Ping
            | AnthropicEvent::Ignored => {}
        }
        Flow::Continue
    }

    fn usage(&self) -> Option<TokenUsage> {
        if self.input_tokens.is_none() && self.output_tokens.is_none() {
            return None;
        }
        Some(TokenUsage {
            input: self.input_tokens.unwrap_or(0),
            output: self.output_tokens.unwrap_or(0),
        })
    }
}

/// Responses API events → chat chunks, under one generated id per stream.
#[derive(Debug)]
pub struct ResponsesTranscoder {
    model: String,
    id: String,
    usage: Option<TokenUsage>,
}

impl ResponsesTranscoder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            usage: None,
        }
    }
}

impl Transcoder for ResponsesTranscoder {
    fn on_event(&mut self, event: &SseEvent, out: &mut VecDeque<Bytes>) -> Flow {
        let parsed = match ResponsesEvent::parse(&event.event, &event.data) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(event = %event.event, "Skipping malformed Responses event: {}", e);
                return Flow::Continue;
            }
        };

        match parsed {
            ResponsesEvent::OutputTextDelta { delta: Some(delta) } => {
                push_frame(out, &ChatCompletionChunk::content(&self.id, &self.model, delta));
                Flow::Continue
            }
            ResponsesEvent::Completed { usage } => {
                if let Some(u) = usage {
                    self.usage = Some(TokenUsage {
                        input: u.input_tokens.unwrap_or(0),
                        output: u.output_tokens.unwrap_or(0),
                    });
                }
                push_frame(out, &ChatCompletionChunk::finish(&self.id, &self.model, "stop"));
                out.push_back(encode_done());
                Flow::Done
            }
            ResponsesEvent::OutputTextDelta { delta: None } | ResponsesEvent::Ignored => {
                Flow::Continue
            }
        }
    }

    fn usage(&self) -> Option<TokenUsage> {
        self.usage
    }
}

/// Drives a [`Transcoder`] over an upstream SSE body.
pub struct TranscodeStream<T: Transcoder> {
    upstream: ByteStream,
    parser: SseParser,
    transcoder: T,
    pending: VecDeque<Bytes>,
    upstream_done: bool,
    tracker: RequestTracker,
    status: u16,
}

impl<T: Transcoder> TranscodeStream<T> {
    pub fn new(upstream: ByteStream, transcoder: T, tracker: RequestTracker, status: u16) -> Self {
        Self {
            upstream,
            parser: SseParser::new(),
            transcoder,
            pending: VecDeque::new(),
            upstream_done: false,
            tracker,
            status,
        }
    }

    fn feed(&mut self, event: &SseEvent) {
        if self.transcoder.on_event(event, &mut self.pending) == Flow::Done {
            self.close_upstream();
        }
    }

    /// Stop reading and drop the upstream body so the connection is released.
    fn close_upstream(&mut self) {
        self.upstream_done = true;
        self.upstream = stream::empty::<Result<Bytes, std::io::Error>>().boxed();
    }

    fn finish_tracker(&self) {
        self.tracker.finish(self.status, self.transcoder.usage());
    }
}

impl<T: Transcoder> Stream for TranscodeStream<T> {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(frame) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(frame)));
            }

            if this.upstream_done {
                this.finish_tracker();
                return Poll::Ready(None);
            }

            match this.upstream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.parser.push(&chunk);
                    while !this.upstream_done {
                        match this.parser.next_event() {
                            Some(event) => this.feed(&event),
                            None => break,
                        }
                    }
                }
                Poll::Ready(Some(Err(err))) => {
                    error!("Stream transcoding error: {}", err);
                    this.close_upstream();
                }
                Poll::Ready(None) => {
                    if let Some(event) = this.parser.finish() {
                        this.feed(&event);
                    }
                    this.close_upstream();
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<T: Transcoder> Drop for TranscodeStream<T> {
    fn drop(&mut self) {
        // No-op when the stream already ran to completion.
        self.finish_tracker();
    }
}

/// Passthrough body that finishes its tracker when fully sent or dropped.
pub struct TrackedStream {
    inner: ByteStream,
    tracker: RequestTracker,
    status: u16,
}

impl TrackedStream {
    pub fn new(inner: ByteStream, tracker: RequestTracker, status: u16) -> Self {
        Self {
            inner,
            tracker,
            status,
        }
    }
}

impl Stream for TrackedStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = this.inner.as_mut().poll_next(cx);
        if let Poll::Ready(None) = polled {
            this.tracker.finish(this.status, None);
        }
        polled
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.tracker.finish(self.status, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatsCollector;
    use serde_json::Value;

    fn ev(event: &str, data: &str) -> SseEvent {
        SseEvent {
            event: event.into(),
            data: data.into(),
        }
    }

    fn run<T: Transcoder>(transcoder: &mut T, events: &[SseEvent]) -> (Vec<Bytes>, Flow) {
        let mut out = VecDeque::new();
        let mut flow = Flow::Continue;
        for e in events {
            flow = transcoder.on_event(e, &mut out);
            if flow == Flow::Done {
                break;
            }
        }
        (out.into_iter().collect(), flow)
    }

    fn frame_json(frame: &Bytes) -> Value {
        let text = std::str::from_utf8(frame).unwrap();
        let body = text
            .strip_prefix("data: ")
            .and_then(|s| s.strip_suffix("\n\n"))
            .unwrap();
        serde_json::from_str(body).unwrap()
    }

    fn upstream(chunks: Vec<&'static str>) -> ByteStream {
        stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c.as_bytes())))).boxed()
    }

    #[test]
    fn anthropic_events_become_four_frames() {
        let mut t = AnthropicTranscoder::new("claude-sonnet-4.5");
        let (frames, flow) = run(
            &mut t,
            &[
                ev("message_start", r#"{"message":{"id":"m1"}}"#),
                ev("content_block_delta", r#"{"delta":{"text":"hi"}}"#),
                ev("message_delta", r#"{"delta":{"stop_reason":"end_turn"}}"#),
                ev("message_stop", r#"{"type":"message_stop"}"#),
            ],
        );
        assert_eq!(flow, Flow::Done);
        assert_eq!(frames.len(), 4);

        let role = frame_json(&frames[0]);
        let content = frame_json(&frames[1]);
        let finish = frame_json(&frames[2]);
        for chunk in [&role, &content, &finish] {
            assert_eq!(chunk["id"], "m1");
            assert_eq!(chunk["object"], "chat.completion.chunk");
            assert_eq!(chunk["model"], "claude-sonnet-4.5");
        }
        assert_eq!(role["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(content["choices"][0]["delta"]["content"], "hi");
        assert_eq!(finish["choices"][0]["finish_reason"], "stop");
        assert_eq!(&frames[3][..], b"data: [DONE]\n\n");
    }

    #[test]
    fn anthropic_skips_pings_empty_text_and_malformed_events() {
        let mut t = AnthropicTranscoder::new("claude");
        let (frames, flow) = run(
            &mut t,
            &[
                ev("ping", r#"{"type": "ping"}"#),
                ev("content_block_start", r#"{"content_block":{"text":""}}"#),
                ev("content_block_delta", r#"{"delta":{"text":""}}"#),
                ev("content_block_delta", "{broken"),
                ev("content_block_delta", r#"{"delta":{"text":"ok"}}"#),
                ev("content_block_stop", "{}"),
            ],
        );
        assert_eq!(flow, Flow::Continue);
        assert_eq!(frames.len(), 1);
        assert_eq!(frame_json(&frames[0])["choices"][0]["delta"]["content"], "ok");
    }

    #[test]
    fn anthropic_usage_is_collected() {
        let mut t = AnthropicTranscoder::new("claude");
        assert_eq!(t.usage(), None);
        run(
            &mut t,
            &[
                ev("message_start", r#"{"message":{"id":"m","usage":{"input_tokens":9}}}"#),
                ev(
                    "message_delta",
                    r#"{"delta":{"stop_reason":"max_tokens"},"usage":{"output_tokens":3}}"#,
                ),
            ],
        );
        assert_eq!(t.usage(), Some(TokenUsage { input: 9, output: 3 }));
    }

    #[test]
    fn responses_events_become_delta_finish_done() {
        let mut t = ResponsesTranscoder::new("o3");
        let (frames, flow) = run(
            &mut t,
            &[
                ev("response.created", r#"{"response":{}}"#),
                ev("response.output_text.delta", r#"{"delta":"hi"}"#),
                ev("response.output_text.delta", r#"{"delta":42}"#),
                ev(
                    "response.completed",
                    r#"{"response":{"usage":{"input_tokens":2,"output_tokens":1}}}"#,
                ),
                ev("response.output_text.delta", r#"{"delta":"late"}"#),
            ],
        );
        assert_eq!(flow, Flow::Done);
        assert_eq!(frames.len(), 3);
        let delta = frame_json(&frames[0]);
        let finish = frame_json(&frames[1]);
        assert_eq!(delta["choices"][0]["delta"]["content"], "hi");
        assert_eq!(finish["choices"][0]["finish_reason"], "stop");
        assert_eq!(delta["id"], finish["id"]);
        assert!(delta["id"].as_str().unwrap().starts_with("chatcmpl-"));
        assert_eq!(&frames[2][..], b"data: [DONE]\n\n");
        assert_eq!(t.usage(), Some(TokenUsage { input: 2, output: 1 }));
    }

    #[actix_web::test]
    async fn stream_handles_split_chunks_and_finishes_tracker() {
        let stats = StatsCollector::new();
        let tracker = stats.start_request("claude");
        let body = upstream(vec![
            "event: message_start\ndata: {\"message\":{\"id\":\"m1\",\"usage\":{\"input_tokens\":5}}}\n\nevent: content_",
            "block_delta\ndata: {\"delta\":{\"text\":\"he",
            "llo\"}}\n\nevent: message_delta\ndata: {\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":2}}\n\n",
            "event: message_stop\ndata: {}\n\n",
            "event: ping\ndata: {}\n\n",
        ]);
        let out: Vec<Bytes> = TranscodeStream::new(body, AnthropicTranscoder::new("claude"), tracker, 200)
            .map(|r| r.unwrap())
            .collect()
            .await;

        assert_eq!(out.len(), 4);
        assert_eq!(frame_json(&out[1])["choices"][0]["delta"]["content"], "hello");
        let snap = stats.snapshot();
        assert_eq!(snap.active_requests, 0);
        assert_eq!(snap.by_model["claude"].tokens, TokenUsage { input: 5, output: 2 });
    }

    #[actix_web::test]
    async fn stream_closes_on_upstream_error() {
        let stats = StatsCollector::new();
        let body: ByteStream = stream::iter(vec![
            Ok(Bytes::from_static(b"event: response.output_text.delta\ndata: {\"delta\":\"a\"}\n\n")),
            Err(std::io::Error::other("connection reset")),
            Ok(Bytes::from_static(b"event: response.output_text.delta\ndata: {\"delta\":\"b\"}\n\n")),
        ])
        .boxed();
        let out: Vec<_> = TranscodeStream::new(
            body,
            ResponsesTranscoder::new("o3"),
            stats.start_request("o3"),
            200,
        )
        .collect()
        .await;

        assert_eq!(out.len(), 1);
        assert!(out[0].is_ok());
        assert_eq!(stats.snapshot().active_requests, 0);
    }

    #[actix_web::test]
    async fn dropping_stream_finishes_tracker() {
        let stats = StatsCollector::new();
        let mut s = TranscodeStream::new(
            upstream(vec![
                "event: response.output_text.delta\ndata: {\"delta\":\"a\"}\n\n",
                "event: response.output_text.delta\ndata: {\"delta\":\"b\"}\n\n",
            ]),
            ResponsesTranscoder::new("o3"),
            stats.start_request("o3"),
            200,
        );
        assert!(s.next().await.is_some());
        assert_eq!(stats.snapshot().active_requests, 1);
        drop(s);
        let snap = stats.snapshot();
        assert_eq!(snap.active_requests, 0);
        assert_eq!(snap.by_model["o3"].requests, 1);
    }

    #[actix_web::test]
    async fn tracked_passthrough_finishes_once() {
        let stats = StatsCollector::new();
        let s = TrackedStream::new(
            upstream(vec!["a", "b"]),
            stats.start_request("gpt-4o"),
            201,
        );
        let out: Vec<_> = s.collect().await;
        assert_eq!(out.len(), 2);
        let snap = stats.snapshot();
        assert_eq!(snap.by_status["201"], 1);
        assert_eq!(snap.by_model["gpt-4o"].requests, 1);
    }
}
