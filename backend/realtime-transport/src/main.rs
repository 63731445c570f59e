use anyhow::{bail, Context};
use realtime_transport::{
    config::HubConfig,
    logging,
    models::UserId,
    services::{MessageCache, NotificationAggregator, PresenceTracker},
    websocket::{
        message_types::{decode, encode, Envelope},
        transport::WsConnector,
        Scope,
    },
    RealtimeHub, Subscription,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();
    let cfg = HubConfig::from_env().context("loading realtime configuration")?;

    let Some(user_id) = cfg.user_id else {
        bail!("REALTIME_USER_ID must be set");
    };

    let connector = Arc::new(WsConnector::new(cfg.connect_timeout, cfg.keepalive_interval));
    let hub = RealtimeHub::init(cfg, connector);
    let mut subscription = hub.attach(Scope::Global)?;

    let mut cache = MessageCache::new(user_id);
    let mut notifications = NotificationAggregator::new();
    let mut presence = PresenceTracker::new();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, shutting down");
                break;
            }
            line = lines.next_line() => match line? {
                Some(line) => {
                    if let Err(e) = handle_line(&subscription, user_id, line.trim()) {
                        tracing::warn!(error = %e, "input rejected");
                    }
                }
                None => {
                    tracing::info!("stdin closed, shutting down");
                    break;
                }
            },
            event = subscription.recv() => {
                let Some(event) = event else { break };
                cache.apply(&event);
                notifications.ingest_event(&event);
                presence.observe(&event);

                if let Envelope::Status { connected: false, .. } = *event {
                    presence.clear();
                }

                tracing::debug!(
                    event = event.type_name(),
                    unread_messages = cache.total_unread(),
                    unread_notifications = notifications.unread_count(),
                    "event received"
                );
                println!("{}", encode(&event)?);
            }
        }
    }

    drop(subscription);
    hub.shutdown().await;
    Ok(())
}

fn handle_line(subscription: &Subscription, user_id: UserId, line: &str) -> anyhow::Result<()> {
    match line {
        "" => Ok(()),
        "/ping" => Ok(subscription.ping()?),
        "/disconnect" => Ok(subscription.disconnect()?),
        "/init" => Ok(subscription.init(user_id)?),
        _ => {
            let envelope = decode(line)?;
            if envelope.is_command() {
                subscription.command(envelope)?;
            } else {
                subscription.send(envelope)?;
            }
            Ok(())
        }
    }
}
