use crate::broker::{SignedVaaBroker, VaaFilter};
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;

/// Streaming subscribe endpoint: maps a filter request 1:1 onto a broker
/// subscription and streams the delivery channel back as hex-encoded VAA
/// frames, one per line, until the client disconnects.
#[derive(Clone)]
pub struct SpyState {
    pub broker: Arc<SignedVaaBroker>,
}

pub fn router(state: SpyState) -> Router {
    Router::new()
        .route("/v1/signed_vaa/subscribe", post(subscribe_signed_vaa))
        .with_state(state)
}

#[derive(Deserialize)]
pub struct SubscribeRequest {
    #[serde(default)]
    pub filters: Vec<FilterEntry>,
}

#[derive(Deserialize)]
pub struct FilterEntry {
    #[serde(rename = "chainId")]
    pub chain_id: u32,
    #[serde(rename = "emitterAddress")]
    pub emitter_address: String,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorInfo,
}

#[derive(Serialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

fn bad_filter(message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: ErrorInfo {
                code: "INVALID_FILTER".to_string(),
                message,
            },
        }),
    )
        .into_response()
}

/// Decodes request filter entries. Emitter addresses are hex, either a
/// 20-byte address (left-padded to 32) or a full 32-byte address.
pub(crate) fn parse_filters(entries: &[FilterEntry]) -> Result<Vec<VaaFilter>, String> {
    let mut filters = Vec::with_capacity(entries.len());
    for entry in entries {
        let chain_id = u16::try_from(entry.chain_id)
            .map_err(|_| format!("chain id {} out of range", entry.chain_id))?;

        let raw = hex::decode(entry.emitter_address.trim_start_matches("0x"))
            .map_err(|err| format!("failed to decode emitter address: {}", err))?;

        let emitter_address = match raw.len() {
            32 => {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(&raw);
                arr
            }
            20 => {
                let mut arr = [0u8; 32];
                arr[12..].copy_from_slice(&raw);
                arr
            }
            n => return Err(format!("emitter address must be 20 or 32 bytes, got {}", n)),
        };

        filters.push(VaaFilter {
            chain_id,
            emitter_address,
        });
    }
    Ok(filters)
}

/// Unsubscribes when the client's response stream is dropped, so a closed
/// connection never leaks a subscription map entry. Holds the runtime
/// handle captured at subscribe time: the response body can be dropped on
/// a thread with no runtime context, where `tokio::spawn` would panic.
struct SubscriptionGuard {
    broker: Arc<SignedVaaBroker>,
    id: String,
    runtime: tokio::runtime::Handle,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let broker = self.broker.clone();
        let id = std::mem::take(&mut self.id);
        self.runtime.spawn(async move {
            broker.unsubscribe(&id).await;
        });
    }
}

pub async fn subscribe_signed_vaa(
    State(state): State<SpyState>,
    Json(req): Json<SubscribeRequest>,
) -> Response {
    let filters = match parse_filters(&req.filters) {
        Ok(filters) => filters,
        Err(message) => return bad_filter(message),
    };

    let (id, rx) = state.broker.subscribe(filters).await;
    tracing::info!(subscription = %id, "signed VAA subscription opened");

    let guard = SubscriptionGuard {
        broker: state.broker.clone(),
        id,
        runtime: tokio::runtime::Handle::current(),
    };

    let stream = ReceiverStream::new(rx).map(move |vaa_bytes| {
        // The guard lives inside the stream; dropping the stream runs
        // the unsubscribe teardown.
        let _ = &guard;
        Ok::<_, Infallible>(Bytes::from(format!("{}\n", hex::encode(vaa_bytes))))
    });

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(stream),
    )
        .into_response()
}
