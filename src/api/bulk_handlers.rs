use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderValue},
    response::Response,
};
use std::io;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::api::handlers::AppState;
use crate::api::negotiation::{Endpoint, RequestFormat};
use crate::logic::{
    parse_bulk_request, read_limited, BulkEnvelope, BulkPermit, BulkProcessor,
    BulkResponseEncoder, BulkResponseSink,
};
use crate::model::{BulkOperationResponse, BulkRequest, MediaType, ScimError};
use crate::store::traits::ResourceBackend;

/// Handles `POST /Bulk`, `/Bulk.json` and `/Bulk.xml`.
///
/// The body is read as JSON or XML according to `Content-Type`. Batch-level
/// failures (negotiation, quota, unreadable body) are returned as a single
/// SCIM error. Once admitted, the response is streamed one record at
/// a time while the operations run.
pub async fn post_bulk<B: ResourceBackend + 'static>(
    State(state): State<AppState<B>>,
    format: RequestFormat,
    body: Body,
) -> Result<Response, ScimError> {
    let negotiated = format.negotiate(Endpoint::Bulk)?;
    let processor = &state.processor;
    let quota = processor.quota();

    let permit = quota.try_acquire()?;
    quota.check_content_length(format.content_length)?;

    let bytes = read_limited(body.into_data_stream(), quota.max_payload_size()).await?;
    let request: BulkRequest = match negotiated.consumes {
        Some(MediaType::Xml) => parse_bulk_request(&bytes)?,
        _ => serde_json::from_slice(&bytes).map_err(|e| {
            ScimError::InvalidResource(format!("Error while reading JSON Bulk content: {}", e))
        })?,
    };
    let envelope = BulkEnvelope::from_request(
        request,
        format.content_length.or(Some(bytes.len() as u64)),
        &state.base_uri,
    );
    quota.check_operation_count(envelope.operations.len())?;

    Ok(stream_response(
        processor.clone(),
        envelope,
        permit,
        negotiated.produces,
    ))
}

/// Forwards encoded records into the response body channel.
struct ChannelSink {
    tx: mpsc::Sender<Result<Bytes, io::Error>>,
    encoder: BulkResponseEncoder,
}

impl ChannelSink {
    async fn send(&self, chunk: Vec<u8>) -> Result<(), ScimError> {
        self.tx.send(Ok(Bytes::from(chunk))).await.map_err(|_| {
            ScimError::ServerError("The client closed the bulk response stream".to_string())
        })
    }

    async fn abort(&self, err: &ScimError) {
        let _ = self
            .tx
            .send(Err(io::Error::new(io::ErrorKind::Other, err.to_string())))
            .await;
    }
}

#[async_trait::async_trait]
impl BulkResponseSink for ChannelSink {
    async fn emit(&mut self, response: BulkOperationResponse) -> Result<(), ScimError> {
        let chunk = self.encoder.operation(&response)?;
        self.send(chunk).await
    }
}

/// Run an admitted batch on its own task, which owns the permit until the
/// last fragment has been queued.
fn stream_response<B: ResourceBackend + 'static>(
    processor: BulkProcessor<B>,
    envelope: BulkEnvelope,
    permit: BulkPermit,
    media_type: MediaType,
) -> Response {
    let (tx, rx) = mpsc::channel::<Result<Bytes, io::Error>>(32);

    tokio::spawn(async move {
        let _permit = permit;
        let mut sink = ChannelSink {
            tx,
            encoder: BulkResponseEncoder::new(media_type),
        };

        let prologue = match sink.encoder.start() {
            Ok(prologue) => prologue,
            Err(err) => {
                sink.abort(&err).await;
                return;
            }
        };
        if sink.send(prologue).await.is_err() {
            return;
        }

        match processor.run(envelope, &mut sink).await {
            Ok(summary) => {
                log::info!(
                    "Bulk request completed: {} of {} operations processed, {} failed",
                    summary.processed,
                    summary.total,
                    summary.failed
                );
                match sink.encoder.finish() {
                    Ok(epilogue) => {
                        let _ = sink.send(epilogue).await;
                    }
                    Err(err) => sink.abort(&err).await,
                }
            }
            Err(err) => {
                log::warn!("Bulk response stream aborted: {}", err);
                sink.abort(&err).await;
            }
        }
    });

    let mut response = Response::new(Body::from_stream(ReceiverStream::new(rx)));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(media_type.content_type()),
    );
    response
}
