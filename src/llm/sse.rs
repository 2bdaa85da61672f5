//! Server-sent event plumbing shared by every wire format.
//!
//! A wire hands over a prepared request and a parser for individual event
//! payloads; this module turns the response into a [`DeltaStream`]. The
//! event source is closed on every terminal event so it never reconnects:
//! one call is exactly one upstream request.

use futures_util::{stream, StreamExt};
use reqwest_eventsource::{Error as EventSourceError, Event, EventSource};
use tracing::debug;

use super::DeltaStream;
use crate::error::{summarize_error_body, ProviderError};

/// What a single SSE message means for the reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Delta(String),
    /// Keep-alives, metadata and anything without text.
    Skip,
    /// Explicit end-of-stream marker.
    Done,
}

/// Parses one message given its event name and data payload.
pub type EventParser = fn(&str, &str) -> Result<SseEvent, ProviderError>;

/// Send `request` and stream the text deltas `parse` extracts from it.
pub fn delta_stream(
    request: reqwest::RequestBuilder,
    parse: EventParser,
) -> Result<DeltaStream, ProviderError> {
    let source = EventSource::new(request)
        .map_err(|e| ProviderError::Other(format!("could not build request: {}", e)))?;

    let deltas = stream::unfold(Some(source), move |state| async move {
        let mut source = state?;
        loop {
            match source.next().await? {
                Ok(Event::Open) => continue,
                Ok(Event::Message(message)) => match parse(&message.event, &message.data) {
                    Ok(SseEvent::Delta(text)) => return Some((Ok(text), Some(source))),
                    Ok(SseEvent::Skip) => continue,
                    Ok(SseEvent::Done) => {
                        source.close();
                        return None;
                    }
                    Err(err) => {
                        source.close();
                        return Some((Err(err), None));
                    }
                },
                Err(EventSourceError::StreamEnded) => {
                    source.close();
                    return None;
                }
                Err(err) => {
                    source.close();
                    return Some((Err(classify_transport_error(err).await), None));
                }
            }
        }
    });

    Ok(Box::pin(deltas))
}

/// Turn an event-source failure into a classified provider error,
/// reading the response body where there is one.
async fn classify_transport_error(err: EventSourceError) -> ProviderError {
    match err {
        EventSourceError::InvalidStatusCode(status, response) => {
            let body = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), body = %body, "provider returned an error response");
            ProviderError::classify(Some(status.as_u16()), &summarize_error_body(&body))
        }
        EventSourceError::InvalidContentType(_, response) => {
            // Usually a JSON error object sent without an event-stream content type.
            let status = response.status();
            let status = (!status.is_success()).then(|| status.as_u16());
            let body = response.text().await.unwrap_or_default();
            ProviderError::classify(status, &summarize_error_body(&body))
        }
        EventSourceError::Transport(e) => match e.status() {
            Some(status) => ProviderError::classify(Some(status.as_u16()), &e.to_string()),
            None => ProviderError::Other(format!("network error: {}", e)),
        },
        other => ProviderError::Other(other.to_string()),
    }
}
