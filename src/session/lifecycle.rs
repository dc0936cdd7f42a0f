//! Connection task: connect, handshake, serve, reconnect
//!
//! One task runs per activation. It owns the transport link; the rest of
//! the session talks to it through the outbound frame channel stored in
//! `Core::link` and the shutdown watch. Every state change it makes is
//! checked against the generation it was started with, so a task that
//! outlives `deactivate()` cannot touch the session.

use crate::error::{RealtimeError, Result};
use crate::protocol::{Command, Frame, FrameParser, HeartBeat, Inbound, Negotiated};
use crate::session::dispatch::HandlerSource;
use crate::session::registry::{MessageHandler, SubscriptionId};
use crate::session::{ConnectionState, SessionInner};
use crate::topics::Topic;
use crate::transport::TransportLink;

use futures::{SinkExt, StreamExt};
use std::future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use url::Url;

/// A link that completed the STOMP handshake
struct Established {
    link: TransportLink,
    parser: FrameParser,
    /// Units that arrived in the same message as CONNECTED
    pending: Vec<Inbound>,
    heartbeat: Negotiated,
}

/// Registry access for dispatch, valid only while the generation is current
struct ActiveView<'a> {
    inner: &'a SessionInner,
    generation: u64,
}

impl HandlerSource for ActiveView<'_> {
    fn subscriber_ids(&self, topic: &Topic) -> Vec<SubscriptionId> {
        let core = self.inner.core.lock();
        if core.generation != self.generation {
            return Vec::new();
        }
        core.registry.subscriber_ids(topic.as_str())
    }

    fn handler(&self, id: SubscriptionId) -> Option<MessageHandler> {
        let core = self.inner.core.lock();
        if core.generation != self.generation {
            return None;
        }
        core.registry.handler(id)
    }
}

pub(super) async fn run(
    inner: Arc<SessionInner>,
    generation: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let url = inner.config.url.clone();
    let mut attempt: u64 = 0;

    loop {
        attempt += 1;
        debug!(url = %url, attempt, "Connecting");

        let established = tokio::select! {
            _ = stopped(&mut shutdown) => return,
            result = establish(&inner) => result,
        };

        let error = match established {
            Ok(established) => {
                let Some(outgoing) = mark_connected(&inner, generation) else {
                    return;
                };
                info!(url = %url, attempt, "Connected");
                attempt = 0;

                match serve(&inner, generation, established, outgoing, &mut shutdown).await {
                    Ok(()) => return,
                    Err(e) => e,
                }
            }
            Err(e) => e,
        };

        if !connection_lost(&inner, generation, error, attempt) {
            return;
        }

        tokio::select! {
            _ = stopped(&mut shutdown) => return,
            _ = time::sleep(inner.config.reconnect_delay) => {}
        }
    }
}

/// Resolves once shutdown was requested or its sender is gone
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn establish(inner: &SessionInner) -> Result<Established> {
    time::timeout(inner.config.connect_timeout, handshake(inner))
        .await
        .map_err(|_| RealtimeError::Timeout)?
}

async fn handshake(inner: &SessionInner) -> Result<Established> {
    let config = &inner.config;
    let mut link = inner.connector.connect(&config.url).await?;

    let ours = HeartBeat::new(config.heartbeat_outgoing, config.heartbeat_incoming);
    let connect = Frame::connect(&host_header(&config.url), ours);
    link.outbound.send(connect.encode()).await?;

    let mut parser = FrameParser::new();
    loop {
        let text = match link.inbound.next().await {
            Some(text) => text?,
            None => {
                return Err(RealtimeError::Connection(
                    "Connection closed during handshake".into(),
                ))
            }
        };

        let parsed = parser.push(text.as_bytes());
        if let Some(e) = parsed.errors.into_iter().next() {
            return Err(e);
        }
        let mut units = parsed.units.into_iter();
        while let Some(unit) = units.next() {
            let frame = match unit {
                Inbound::Heartbeat => continue,
                Inbound::Frame(frame) => frame,
            };

            match frame.command {
                Command::Connected => {
                    let server = match frame.get("heart-beat") {
                        Some(value) => HeartBeat::parse(value)?,
                        None => HeartBeat::default(),
                    };
                    debug!(
                        version = frame.get("version").unwrap_or("1.0"),
                        server = frame.get("server").unwrap_or("unknown"),
                        "Handshake complete"
                    );
                    return Ok(Established {
                        link,
                        parser,
                        pending: units.collect(),
                        heartbeat: ours.negotiate(&server),
                    });
                }
                Command::Error => return Err(RealtimeError::Protocol(error_message(&frame))),
                other => {
                    return Err(RealtimeError::Protocol(format!(
                        "unexpected {} before CONNECTED",
                        other
                    )))
                }
            }
        }
    }
}

/// Publish the new link and replay the registry onto it
fn mark_connected(
    inner: &SessionInner,
    generation: u64,
) -> Option<mpsc::UnboundedReceiver<Frame>> {
    let mut core = inner.core.lock();
    if core.generation != generation {
        return None;
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let core = &mut *core;
    core.wire.reset();
    for topic in core.registry.topics() {
        if let Some(frame) = core.wire.open(topic) {
            let _ = tx.send(frame);
        }
    }
    debug!(topics = core.wire.len(), "Re-subscribed registry topics");

    core.link = Some(tx);
    core.connects += 1;
    inner.set_state(ConnectionState::Connected);
    Some(rx)
}

/// Returns whether the task should retry
fn connection_lost(
    inner: &SessionInner,
    generation: u64,
    error: RealtimeError,
    attempt: u64,
) -> bool {
    let mut core = inner.core.lock();
    if core.generation != generation {
        return false;
    }

    core.link = None;
    core.wire.reset();

    if inner.config.auto_reconnect {
        warn!(
            error = %error,
            attempt,
            delay = ?inner.config.reconnect_delay,
            "Connection lost, will reconnect"
        );
        inner.set_state(ConnectionState::Connecting);
        true
    } else {
        warn!(error = %error, "Connection lost");
        *inner.last_error.lock() = Some(error);
        core.task = None;
        core.shutdown = None;
        inner.set_state(ConnectionState::Disconnected);
        false
    }
}

/// Pump frames until shutdown (Ok) or connection loss (Err)
async fn serve(
    inner: &SessionInner,
    generation: u64,
    established: Established,
    mut outgoing: mpsc::UnboundedReceiver<Frame>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let Established {
        mut link,
        mut parser,
        pending,
        heartbeat,
    } = established;

    for unit in pending {
        handle_unit(inner, generation, unit)?;
    }

    let mut ticker = heartbeat.send_every.map(|every| {
        let mut interval = time::interval_at(Instant::now() + every, every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let silence_limit = heartbeat.silence_limit();
    let mut last_inbound = Instant::now();

    loop {
        tokio::select! {
            _ = stopped(shutdown) => {
                close(&mut link).await;
                return Ok(());
            }

            frame = outgoing.recv() => match frame {
                Some(frame) => {
                    trace!(command = %frame.command, "Sending frame");
                    link.outbound.send(frame.encode()).await?;
                }
                // Sender cleared by deactivate()
                None => {
                    close(&mut link).await;
                    return Ok(());
                }
            },

            incoming = link.inbound.next() => match incoming {
                Some(Ok(text)) => {
                    last_inbound = Instant::now();
                    let parsed = parser.push(text.as_bytes());
                    for e in &parsed.errors {
                        warn!(error = %e, "Discarding undecodable frame");
                    }
                    for unit in parsed.units {
                        handle_unit(inner, generation, unit)?;
                    }
                }
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(RealtimeError::Connection(
                        "Connection closed by server".into(),
                    ))
                }
            },

            _ = tick(&mut ticker) => {
                link.outbound.send("\n".to_string()).await?;
            }

            _ = expire(silence_limit.map(|limit| last_inbound + limit)) => {
                return Err(RealtimeError::HeartbeatTimeout);
            }
        }
    }
}

fn handle_unit(inner: &SessionInner, generation: u64, unit: Inbound) -> Result<()> {
    let frame = match unit {
        Inbound::Heartbeat => return Ok(()),
        Inbound::Frame(frame) => frame,
    };

    match frame.command {
        Command::Message => {
            let view = ActiveView { inner, generation };
            match inner.dispatcher.dispatch(&view, &frame) {
                Ok(report) => trace!(
                    topic = %report.topic,
                    delivered = report.delivered,
                    failed = report.failed,
                    "Dispatched"
                ),
                Err(e) => warn!(
                    destination = frame.destination().unwrap_or(""),
                    error = %e,
                    "Dropping frame"
                ),
            }
        }
        Command::Error => return Err(RealtimeError::Protocol(error_message(&frame))),
        Command::Receipt => debug!(receipt = frame.get("receipt-id").unwrap_or(""), "Receipt"),
        other => debug!(command = %other, "Ignoring unexpected frame"),
    }

    Ok(())
}

/// Best-effort DISCONNECT, then close the transport
async fn close(link: &mut TransportLink) {
    if let Err(e) = link.outbound.send(Frame::disconnect().encode()).await {
        debug!(error = %e, "DISCONNECT not sent");
    }
    let _ = link.outbound.close().await;
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

fn error_message(frame: &Frame) -> String {
    match frame.get("message") {
        Some(message) => message.to_string(),
        None if !frame.body.is_empty() => String::from_utf8_lossy(&frame.body).into_owned(),
        None => "broker sent ERROR".to_string(),
    }
}

/// Value for the CONNECT `host` header
fn host_header(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|url| {
            let host = url.host_str()?.to_string();
            Some(match url.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host,
            })
        })
        .unwrap_or_else(|| "localhost".to_string())
}
