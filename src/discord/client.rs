//! Discord client bootstrap.
//!
//! Owns the bot token and HTTP client, resolves the relay identity, and keeps
//! the gateway connection running until shutdown. Serenity handles resumes on
//! its own; when the client itself ends with an error it is rebuilt after an
//! exponential backoff.

use std::sync::Arc;
use std::time::{Duration, Instant};

use backon::BackoffBuilder;
use serenity::http::Http;
use serenity::prelude::*;
use serenity::Client;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::common::messages::RelayInput;
use crate::common::types::AuthorId;
use crate::discord::handler::RelayHandler;
use crate::discord::sender::DiscordSender;

/// A session that lasted this long resets the backoff.
const STABLE_SESSION: Duration = Duration::from_secs(60);

/// Gateway intents needed to see guild messages, edits and deletes.
pub fn gateway_intents() -> GatewayIntents {
    GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT
}

/// Exponential backoff for gateway restarts.
/// 5s initial, 5min max, factor 1.5, with jitter, unlimited retries.
fn gateway_backoff() -> impl Iterator<Item = Duration> {
    backon::ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(5))
        .with_max_delay(Duration::from_secs(300))
        .with_factor(1.5)
        .with_jitter()
        .without_max_times()
        .build()
}

/// The Discord side of the relay.
pub struct DiscordRelay {
    token: String,
    http: Arc<Http>,
    input_tx: mpsc::UnboundedSender<RelayInput>,
}

impl DiscordRelay {
    pub fn new(token: impl Into<String>, input_tx: mpsc::UnboundedSender<RelayInput>) -> Self {
        let token = token.into();
        let http = Arc::new(Http::new(&token));
        Self {
            token,
            http,
            input_tx,
        }
    }

    /// The bot's own user id, used by the loop guard.
    pub async fn relay_identity(&self) -> anyhow::Result<AuthorId> {
        let user = self.http.get_current_user().await?;
        info!("Relaying as {} ({})", user.name, user.id);
        Ok(AuthorId(user.id.get()))
    }

    /// Send capability sharing this relay's HTTP client.
    pub fn sender(&self) -> DiscordSender {
        DiscordSender::new(Arc::clone(&self.http))
    }

    async fn build_client(&self) -> anyhow::Result<Client> {
        let handler = RelayHandler::new(self.input_tx.clone());
        let client = Client::builder(&self.token, gateway_intents())
            .event_handler(handler)
            .await?;
        Ok(client)
    }

    /// Run the gateway until shutdown is signalled.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut backoff = gateway_backoff();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            info!("Connecting to Discord...");

            let result = match self.build_client().await {
                Ok(mut client) => {
                    let shard_manager = client.shard_manager.clone();
                    let started = Instant::now();

                    let result = tokio::select! {
                        result = client.start() => Some(result.map_err(anyhow::Error::from)),
                        _ = wait_for_shutdown(&mut shutdown_rx) => {
                            info!("Initiating graceful Discord shutdown...");
                            shard_manager.shutdown_all().await;
                            info!("Discord shutdown complete");
                            None
                        }
                    };
                    if started.elapsed() >= STABLE_SESSION {
                        backoff = gateway_backoff();
                    }
                    result
                }
                Err(e) => {
                    error!("Failed to build Discord client: {}", e);
                    Some(Err(e))
                }
            };

            match result {
                None => break,
                Some(Ok(())) => {
                    info!("Discord client disconnected normally");
                    break;
                }
                Some(Err(e)) => {
                    let delay = backoff.next().unwrap_or(Duration::from_secs(300));
                    warn!(
                        "Discord gateway ended ({}). Reconnecting in {:.1}s...",
                        e,
                        delay.as_secs_f64()
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = wait_for_shutdown(&mut shutdown_rx) => break,
                    }
                }
            }
        }

        info!("Discord task ended");
    }
}

async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}
