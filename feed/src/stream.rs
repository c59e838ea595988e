use backon::BackoffBuilder;
use fastwebsockets::{Frame, FragmentCollector, OpCode, Payload};
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use std::time::Duration;

use crate::{
    FeedError, LiveBar, Subscription,
    connect::{State, WS_READ_TIMEOUT, connect_ws},
};

/// Commands accepted by a running stream task.
#[derive(Debug, Clone)]
pub enum Command {
    /// Replace the active subscription with a new (market, interval) pair.
    Switch(Subscription),
}

/// Events a stream task reports back to its controller.
#[derive(Debug, Clone)]
pub enum Event {
    Connected,
    Disconnected(String),
    BarReceived(LiveBar),
}

/// The server pushes either bar-shaped rows or notice objects (ack and
/// error payloads) on the same socket.
#[derive(Deserialize)]
#[serde(untagged)]
enum StreamMessage {
    Bar(LiveBar),
    Notice { detail: serde_json::Value },
}

fn parse_stream_message(payload: &[u8]) -> Result<StreamMessage, FeedError> {
    serde_json::from_slice(payload).map_err(|e| FeedError::ParseError(e.to_string()))
}

/// `mls: false` asks the server for timestamps in unix seconds rather
/// than milliseconds.
fn subscribe_payload(subscription: &Subscription) -> String {
    json!({
        "event_type": "subscribe",
        "data_type": "ohlcv",
        "exchange": subscription.market.exchange,
        "base_id": subscription.market.base_id,
        "quote_id": subscription.market.quote_id,
        "interval": subscription.interval,
        "mls": false,
    })
    .to_string()
}

fn unsubscribe_payload(subscription: &Subscription) -> String {
    json!({
        "event_type": "unsubscribe",
        "data_type": "ohlcv",
        "exchange": subscription.market.exchange,
        "base_id": subscription.market.base_id,
        "quote_id": subscription.market.quote_id,
        "interval": subscription.interval,
        "mls": false,
    })
    .to_string()
}

/// The server pushes one row per `to_minutes()` seconds for the subscribed
/// interval, so a flat read timeout would flag slow intervals as stale.
/// Allow three missed pushes before reconnecting.
fn read_timeout(subscription: &Subscription) -> Duration {
    Duration::from_secs(u64::from(subscription.interval.to_minutes()))
        .saturating_mul(3)
        .max(WS_READ_TIMEOUT)
}

async fn write_text(
    ws: &mut FragmentCollector<TokioIo<Upgraded>>,
    payload: &str,
) -> Result<(), FeedError> {
    ws.write_frame(Frame::text(Payload::Borrowed(payload.as_bytes())))
        .await
        .map_err(|e| FeedError::WebsocketError(e.to_string()))
}

async fn switch_subscription(
    ws: &mut FragmentCollector<TokioIo<Upgraded>>,
    active: Option<&Subscription>,
    next: &Subscription,
) -> Result<(), FeedError> {
    if let Some(active) = active {
        write_text(ws, &unsubscribe_payload(active)).await?;
    }
    write_text(ws, &subscribe_payload(next)).await?;

    log::info!("Subscribed to {next}");
    Ok(())
}

/// Connects to the bar socket and keeps exactly one subscription alive,
/// delaying by `policy` before every reconnect, until the command channel
/// closes.
pub async fn run<B>(
    ws_url: String,
    policy: B,
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<Event>,
) where
    B: BackoffBuilder + Clone + 'static,
{
    let mut state = State::Disconnected;
    let mut current: Option<Subscription> = None;
    let mut delays = policy.clone().build();

    loop {
        match &mut state {
            State::Disconnected => {
                if current.is_none() {
                    match commands.recv().await {
                        Some(Command::Switch(subscription)) => current = Some(subscription),
                        None => return,
                    }
                }
                // Coalesce queued switches so reconnects pick up the
                // newest subscription instead of replaying stale ones.
                while let Ok(Command::Switch(subscription)) = commands.try_recv() {
                    current = Some(subscription);
                }
                let Some(subscription) = current.clone() else {
                    continue;
                };

                match connect_ws(&ws_url).await {
                    Ok(mut ws) => {
                        if let Err(e) =
                            write_text(&mut ws, &subscribe_payload(&subscription)).await
                        {
                            let _ = events
                                .send(Event::Disconnected(format!("Subscribe failed: {e}")))
                                .await;
                            if let Some(delay) = delays.next() {
                                tokio::time::sleep(delay).await;
                            }
                            continue;
                        }

                        log::info!("Subscribed to {subscription}");
                        state = State::Connected(ws);
                        delays = policy.clone().build();
                        let _ = events.send(Event::Connected).await;
                    }
                    Err(e) => {
                        if let Some(delay) = delays.next() {
                            tokio::time::sleep(delay).await;
                        }
                        let _ = events
                            .send(Event::Disconnected(format!("Connection failed: {e}")))
                            .await;
                    }
                }
            }
            State::Connected(ws) => {
                let idle = current.as_ref().map_or(WS_READ_TIMEOUT, read_timeout);

                tokio::select! {
                    command = commands.recv() => match command {
                        Some(Command::Switch(next)) => {
                            let result = switch_subscription(ws, current.as_ref(), &next).await;
                            current = Some(next);

                            if let Err(e) = result {
                                state = State::Disconnected;
                                let _ = events
                                    .send(Event::Disconnected(format!("Switch failed: {e}")))
                                    .await;
                                if let Some(delay) = delays.next() {
                                    tokio::time::sleep(delay).await;
                                }
                            }
                        }
                        None => return,
                    },
                    result = tokio::time::timeout(idle, ws.read_frame()) => match result {
                        Ok(Ok(msg)) => match msg.opcode {
                            OpCode::Text => match parse_stream_message(&msg.payload) {
                                Ok(StreamMessage::Bar(bar)) => {
                                    let _ = events.send(Event::BarReceived(bar)).await;
                                }
                                Ok(StreamMessage::Notice { detail }) => {
                                    log::info!("Bar stream notice: {detail}");
                                }
                                Err(e) => log::warn!("Failed to parse stream message: {e}"),
                            },
                            OpCode::Close => {
                                state = State::Disconnected;
                                let _ = events
                                    .send(Event::Disconnected("Connection closed".to_string()))
                                    .await;
                                if let Some(delay) = delays.next() {
                                    tokio::time::sleep(delay).await;
                                }
                            }
                            OpCode::Ping => {
                                let _ = ws.write_frame(Frame::pong(msg.payload)).await;
                            }
                            _ => {}
                        },
                        Ok(Err(e)) => {
                            state = State::Disconnected;
                            let _ = events
                                .send(Event::Disconnected(format!("Error reading frame: {e}")))
                                .await;
                            if let Some(delay) = delays.next() {
                                tokio::time::sleep(delay).await;
                            }
                        }
                        Err(_) => {
                            log::warn!("Bar stream read timed out, reconnecting");
                            state = State::Disconnected;
                            let _ = events
                                .send(Event::Disconnected(
                                    "Read timeout (connection stale)".to_string(),
                                ))
                                .await;
                            if let Some(delay) = delays.next() {
                                tokio::time::sleep(delay).await;
                            }
                        }
                    },
                }
            }
        }
    }
}
