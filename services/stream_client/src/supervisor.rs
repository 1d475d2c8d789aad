//! # Connection Supervisor
//!
//! One task per [`Connection`](crate::Connection). It owns the read half of the
//! transport and the adapter's handler, and runs the lifecycle:
//!
//! ```text
//! Connecting ──dial ok──▶ replay subscriptions ──▶ Open ──failure──┐
//!     ▲                                                            │
//!     └──────────── backoff (reconnect enabled) ◀─────────────────┘
//! ```
//!
//! Every failure rejects all pending waiters of the connection before the
//! next dial. While Open the task selects over shutdown, inbound frames, the
//! ping ticker and the silence deadline. A connection silent for
//! [`ClientConfig::dead_after`](crate::ClientConfig::dead_after) is torn down
//! with `RequestTimeout`.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use network::{Connector, Frame, FrameSink, FrameStream};

use crate::config::ReconnectConfig;
use crate::connection::{ConnectionStatus, Shared};
use crate::handler::{MessageContext, MessageHandler};
use crate::AdapterError;

/// Drive one connection until it is closed or gives up reconnecting
pub(crate) async fn run<H: MessageHandler>(
    shared: Arc<Shared<H::Value>>,
    connector: Arc<dyn Connector>,
    mut handler: H,
) {
    let reconnect = shared.config.reconnect.clone();
    let mut attempt: u32 = 0;
    let mut sessions: u64 = 0;

    loop {
        if shared.is_closing() {
            break;
        }
        shared.set_status(ConnectionStatus::Connecting);

        let error = match dial(&shared, connector.as_ref()).await {
            Ok((sink, stream)) => {
                if sessions > 0 {
                    shared.stats.record_reconnect();
                }
                sessions += 1;
                attempt = 0;
                session(&shared, &mut handler, sink, stream, connector.answers_pings()).await
            }
            Err(e) => e,
        };

        shared.drop_writer().await;
        let rejected = shared.reject_all(&error);
        handler.on_disconnect(&error);

        if shared.is_closing() {
            debug!(url = shared.url(), "Connection closed by client");
            break;
        }

        warn!(url = shared.url(), error = %error, rejected, "Connection lost");

        if !reconnect.enabled {
            break;
        }

        attempt = attempt.saturating_add(1);
        if reconnect.max_attempts > 0 && attempt > reconnect.max_attempts {
            error!(
                url = shared.url(),
                max_attempts = reconnect.max_attempts,
                "Giving up reconnecting"
            );
            shared.reject_all(&AdapterError::MaxReconnectAttemptsExceeded {
                url: shared.url().to_string(),
                max_attempts: reconnect.max_attempts,
            });
            break;
        }

        let delay = backoff_delay(&reconnect, attempt);
        info!(
            url = shared.url(),
            attempt,
            backoff_ms = delay.as_millis() as u64,
            "Reconnecting"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shared.shutdown.notified() => break,
        }
    }

    shared.drop_writer().await;
    shared.reject_all(&shared.closed_error());
    shared.set_status(ConnectionStatus::Closed);
    info!(url = shared.url(), "Connection terminated");
}

async fn dial<V: Clone + Send + Sync + 'static>(
    shared: &Shared<V>,
    connector: &dyn Connector,
) -> Result<(FrameSink, FrameStream), AdapterError> {
    let timeout = shared.config.connect_timeout();
    debug!(url = shared.url(), "Dialing");

    tokio::select! {
        outcome = tokio::time::timeout(timeout, connector.connect(shared.url())) => match outcome {
            Ok(Ok(halves)) => Ok(halves),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(AdapterError::RequestTimeout {
                operation: format!("connect {}", shared.url()),
                timeout_ms: shared.config.connect_timeout_ms,
            }),
        },
        _ = shared.shutdown.notified() => Err(shared.closed_error()),
    }
}

/// Serve one transport until it fails; returns the failure
async fn session<H: MessageHandler>(
    shared: &Arc<Shared<H::Value>>,
    handler: &mut H,
    sink: FrameSink,
    mut stream: FrameStream,
    answers_pings: bool,
) -> AdapterError {
    shared.install_writer(sink).await;
    shared.touch();

    let mut ctx = MessageContext::new(shared);
    handler.on_open(&mut ctx);
    let replies = ctx.take_replies();
    if let Err(e) = flush(shared, replies).await {
        return e;
    }

    // Replayed before Open so new watch() calls queue behind them.
    for (topic, frame) in shared.subscription_frames() {
        debug!(url = shared.url(), topic = %topic, "Replaying subscription");
        if let Err(e) = shared.write(frame).await {
            return e;
        }
    }

    shared.set_status(ConnectionStatus::Open);
    info!(url = shared.url(), "Connection open");

    let config = shared.config.clone();
    let period = config.ping_interval();
    let dead_after = config.dead_after();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shared.shutdown.notified() => {
                return shared.closed_error();
            }
            next = stream.next() => {
                let frame = match next {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => return e.into(),
                    None => {
                        return AdapterError::ConnectionClosed {
                            url: shared.url().to_string(),
                            reason: Some("stream ended".to_string()),
                        };
                    }
                };
                shared.stats.record_received();
                shared.touch();

                match frame {
                    Frame::Ping(_) if answers_pings => {}
                    Frame::Ping(payload) => {
                        if let Err(e) = shared.write(Frame::Pong(payload)).await {
                            return e;
                        }
                    }
                    Frame::Pong(_) => {}
                    Frame::Close(reason) => {
                        return AdapterError::ConnectionClosed {
                            url: shared.url().to_string(),
                            reason,
                        };
                    }
                    data => {
                        let mut ctx = MessageContext::new(shared);
                        let outcome = handler.handle_message(&mut ctx, &data);
                        let replies = ctx.take_replies();
                        if let Err(e) = outcome {
                            shared.stats.record_dropped();
                            warn!(url = shared.url(), error = %e, "Dropping frame");
                        }
                        if let Err(e) = flush(shared, replies).await {
                            return e;
                        }
                    }
                }
            }
            _ = tokio::time::sleep_until(shared.silence_deadline(dead_after)) => {
                let idle = shared.idle_for();
                if idle >= dead_after {
                    warn!(
                        url = shared.url(),
                        idle_ms = idle.as_millis() as u64,
                        "No traffic within keepalive window"
                    );
                    return AdapterError::RequestTimeout {
                        operation: "keepalive".to_string(),
                        timeout_ms: dead_after.as_millis() as u64,
                    };
                }
            }
            _ = ticker.tick() => {
                let ping = handler.ping().unwrap_or_else(|| Frame::Ping(Vec::new()));
                if let Err(e) = shared.write(ping).await {
                    return e;
                }
            }
        }
    }
}

async fn flush<V: Clone + Send + Sync + 'static>(
    shared: &Shared<V>,
    frames: Vec<Frame>,
) -> Result<(), AdapterError> {
    for frame in frames {
        shared.write(frame).await?;
    }
    Ok(())
}

/// `base * 2^(attempt-1)` capped at `max`, plus up to 50% jitter
pub(crate) fn backoff_delay(config: &ReconnectConfig, attempt: u32) -> Duration {
    let base = Duration::from_millis(config.base_backoff_ms);
    let max = Duration::from_millis(config.max_backoff_ms);
    let exponent = attempt.saturating_sub(1).min(31);
    let delay = base.saturating_mul(2u32.saturating_pow(exponent)).min(max);

    let jitter = rand::random::<f64>() * 0.5;
    delay + Duration::from_secs_f64(delay.as_secs_f64() * jitter)
}
