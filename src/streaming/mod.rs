//! Streaming translation between the OpenAI and Anthropic event formats.

pub mod anthropic_to_openai;
pub mod openai_to_anthropic;
pub mod sse;

pub use anthropic_to_openai::AnthropicToOpenAiStream;
pub use openai_to_anthropic::OpenAiToAnthropicStream;
pub use sse::{SseDecoder, SseFrame, SsePayload};

use bytes::Bytes;
use futures::{ready, Stream};
use pin_project::pin_project;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A state machine turning decoded upstream frames into client-dialect
/// event text.
pub trait StreamTranslator: Send {
    fn transition(&mut self, frame: &SseFrame) -> Vec<String>;

    /// Called once the upstream stream ends.
    fn finish(&mut self) -> Vec<String> {
        Vec::new()
    }
}

/// Wraps an upstream byte stream and yields translated event bytes.
#[pin_project]
pub struct TranslatedStream<S> {
    #[pin]
    inner: S,
    decoder: SseDecoder,
    translator: Box<dyn StreamTranslator>,
    pending: VecDeque<Bytes>,
    finished: bool,
}

impl<S> TranslatedStream<S> {
    pub fn new(inner: S, translator: Box<dyn StreamTranslator>) -> Self {
        Self {
            inner,
            decoder: SseDecoder::new(),
            translator,
            pending: VecDeque::new(),
            finished: false,
        }
    }
}

impl<S, E> Stream for TranslatedStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            if let Some(bytes) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(bytes)));
            }
            if *this.finished {
                return Poll::Ready(None);
            }

            match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => {
                    for frame in this.decoder.push(&chunk) {
                        for text in this.translator.transition(&frame) {
                            this.pending.push_back(Bytes::from(text));
                        }
                    }
                }
                Some(Err(e)) => return Poll::Ready(Some(Err(e))),
                None => {
                    *this.finished = true;
                    for frame in this.decoder.finish() {
                        for text in this.translator.transition(&frame) {
                            this.pending.push_back(Bytes::from(text));
                        }
                    }
                    for text in this.translator.finish() {
                        this.pending.push_back(Bytes::from(text));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::convert::Infallible;

    #[tokio::test]
    async fn test_anthropic_stream_to_openai_chunks() {
        let upstream = [
            "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"m1\",\"usage\":{\"input_tokens\":4}}}\n\n",
            "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,",
            "\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n",
            "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
            "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":1}}\n\n",
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        ];
        let inner = futures::stream::iter(
            upstream
                .into_iter()
                .map(|s| Ok::<_, Infallible>(Bytes::from(s))),
        );

        let stream = TranslatedStream::new(inner, Box::new(AnthropicToOpenAiStream::new("claude")));
        let out: Vec<String> = stream
            .map(|item| String::from_utf8(item.unwrap().to_vec()).unwrap())
            .collect()
            .await;

        assert_eq!(out.len(), 4);
        assert!(out[0].contains("\"role\":\"assistant\""));
        assert!(out[1].contains("\"content\":\"Hi\""));
        assert!(out[2].contains("\"finish_reason\":\"stop\""));
        assert_eq!(out[3], "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_openai_stream_without_done_still_terminates() {
        let inner = futures::stream::iter(vec![Ok::<_, Infallible>(Bytes::from_static(
            b"data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"x\"},\"finish_reason\":\"stop\"}]}\n\n",
        ))]);
        let stream = TranslatedStream::new(inner, Box::new(OpenAiToAnthropicStream::new("gpt-4")));
        let out: Vec<String> = stream
            .map(|item| String::from_utf8(item.unwrap().to_vec()).unwrap())
            .collect()
            .await;

        assert!(out.first().unwrap().starts_with("event: message_start"));
        assert!(out.last().unwrap().starts_with("event: message_stop"));
    }
}
