use anyhow::Result;
use guardian_common::broker::SignedVaaBroker;
use guardian_common::channels::{observation_channel, ReobservationRouter, WATCHER_CHANNEL_CAPACITY};
use guardian_common::config::NodeConfig;
use guardian_common::pending::PendingMessageQueue;
use guardian_common::registry::{
    GuardianSetRegistry, GuardianSetState, QuorumVerdict, MAX_NODES_PER_GUARDIAN,
};
use guardian_common::spy::{router, SpyState};
use guardian_common::types::PendingMessage;
use std::sync::Arc;
use tokio::sync::mpsc;

/// How many times a VAA whose guardian set is unresolvable is re-verified
/// before being dropped. Delays double from the fetch timeout, so the last
/// attempt waits over a minute for the set source to catch up.
const SIGNED_VAA_RETRY_ATTEMPTS: usize = 5;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    tracing::info!("guardian node starting...");

    let config = match std::env::var("GUARDIAND_CONFIG") {
        Ok(path) => NodeConfig::load_from_file(&path)?,
        Err(_) => NodeConfig::default_test_config(),
    };

    let state = Arc::new(GuardianSetState::with_limits(
        MAX_NODES_PER_GUARDIAN,
        config.timeouts.heartbeat_max_age(),
    ));
    let registry = Arc::new(GuardianSetRegistry::with_fetch_timeout(
        state.clone(),
        None,
        config.timeouts.fetch_timeout(),
    ));
    let queue = Arc::new(PendingMessageQueue::new());
    let broker = Arc::new(SignedVaaBroker::with_delivery_timeout(
        config.timeouts.delivery_timeout(),
    ));
    let reobservations = Arc::new(ReobservationRouter::new());

    // Inbound observations from chain watchers. Watchers are handed the
    // sending side when they are spawned.
    let (_obs_tx, mut obs_rx) = observation_channel(WATCHER_CHANNEL_CAPACITY);

    // Inbound quorum-signed VAAs from gossip.
    let (_signed_tx, mut signed_rx) = mpsc::channel::<Vec<u8>>(WATCHER_CHANNEL_CAPACITY);

    // Outbound reobservation requests, routed to watchers by chain id.
    let (_reobs_tx, mut reobs_rx) =
        mpsc::channel::<guardian_common::channels::ReobservationRequest>(WATCHER_CHANNEL_CAPACITY);
    {
        let reobservations = reobservations.clone();
        tokio::spawn(async move {
            while let Some(req) = reobs_rx.recv().await {
                reobservations.route(req).await;
            }
        });
    }

    // Observation ingest: hold each observation in the pending queue. The
    // release delay is policy decided upstream; new observations enter with
    // an immediate release time.
    {
        let queue = queue.clone();
        tokio::spawn(async move {
            while let Some(msg) = obs_rx.recv().await {
                let pending = PendingMessage {
                    release_time: chrono::Utc::now().timestamp(),
                    msg,
                };
                queue.push(pending).await;
            }
        });
    }

    // Released observations bound for the aggregation layer.
    let (released_tx, mut released_rx) =
        mpsc::channel::<PendingMessage>(WATCHER_CHANNEL_CAPACITY);

    // Release loop: pop everything whose release time has passed and hand
    // it downstream. Backpressure from the aggregation side is absorbed
    // here rather than in the queue lock.
    {
        let queue = queue.clone();
        let poll = config.timeouts.release_poll_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll);
            loop {
                ticker.tick().await;
                let now = chrono::Utc::now().timestamp();
                for released in queue.pop_released(now).await {
                    if released_tx.send(released).await.is_err() {
                        tracing::error!("released-message channel closed, stopping release loop");
                        return;
                    }
                }
            }
        });
    }

    // Aggregation boundary: the signing pipeline consumes released
    // observations from here. Until a signer is wired in, record the digest
    // each observation would be signed over.
    tokio::spawn(async move {
        while let Some(released) = released_rx.recv().await {
            tracing::info!(
                message = %released.msg.message_id(),
                digest = %hex::encode(released.msg.digest()),
                "observation released for aggregation"
            );
        }
    });

    // Verify inbound signed VAAs and fan them out to subscribers.
    {
        let registry = registry.clone();
        let broker = broker.clone();
        let fetch_timeout = config.timeouts.fetch_timeout();
        tokio::spawn(async move {
            while let Some(vaa_bytes) = signed_rx.recv().await {
                let vaa = match guardian_common::types::VAA::deserialize(&vaa_bytes) {
                    Ok(vaa) => vaa,
                    Err(err) => {
                        tracing::warn!(error = %err, "dropping malformed signed VAA");
                        continue;
                    }
                };

                match registry.verify_quorum(&vaa).await {
                    QuorumVerdict::Valid => {
                        if let Err(err) = broker.publish(&vaa_bytes).await {
                            tracing::error!(error = %err, "failed to publish signed VAA");
                        }
                    }
                    QuorumVerdict::Invalid(reason) => {
                        tracing::warn!(
                            message = %vaa.message_id(),
                            reason = %reason,
                            "dropping invalid signed VAA"
                        );
                    }
                    QuorumVerdict::Unavailable => {
                        // Guardian set not resolvable yet. Retry off the
                        // ingest loop with a capped, doubling backoff, then
                        // drop the VAA for good.
                        let registry = registry.clone();
                        let broker = broker.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(fetch_timeout).await;
                            match registry
                                .verify_quorum_with_retry(
                                    &vaa,
                                    SIGNED_VAA_RETRY_ATTEMPTS,
                                    fetch_timeout,
                                )
                                .await
                            {
                                QuorumVerdict::Valid => {
                                    if let Err(err) = broker.publish(&vaa_bytes).await {
                                        tracing::error!(
                                            error = %err,
                                            "failed to publish signed VAA"
                                        );
                                    }
                                }
                                QuorumVerdict::Invalid(reason) => {
                                    tracing::warn!(
                                        message = %vaa.message_id(),
                                        reason = %reason,
                                        "dropping invalid signed VAA"
                                    );
                                }
                                QuorumVerdict::Unavailable => {
                                    tracing::warn!(
                                        message = %vaa.message_id(),
                                        attempts = SIGNED_VAA_RETRY_ATTEMPTS,
                                        "guardian set never resolved, dropping signed VAA"
                                    );
                                }
                            }
                        });
                    }
                }
            }
        });
    }

    // Heartbeat sweep; the state itself is not self-scheduling.
    {
        let state = state.clone();
        let max_age = config.timeouts.heartbeat_max_age();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(max_age / 2);
            loop {
                ticker.tick().await;
                state.cleanup().await;
            }
        });
    }

    // Streaming subscribe endpoint.
    let app = router(SpyState {
        broker: broker.clone(),
    });
    let addr = format!("{}:{}", config.api.host, config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "spy server listening");
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!(error = %err, "spy server crashed");
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    Ok(())
}
