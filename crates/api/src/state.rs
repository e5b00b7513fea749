//! Shared application state

use anyhow::Context;
use std::sync::Arc;

use crate::auth::AuthState;
use crate::config::{Config, ConfigError, StorageBackend};
use crate::messaging::{
    ConversationResolver, MemoryDirectory, MemoryMessageStore, MemorySeed, MessageService,
    MessageStore, MessagingLimits, OrderDirectory, PgDirectory, PgMessageStore, TicketAggregator,
    UserDirectory,
};
use crate::websocket::room::{EventSink, RoomManager};
use crate::websocket::WebSocketState;

/// State handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub messages: Arc<MessageService>,
    pub tickets: Arc<TicketAggregator>,
    pub store: Arc<dyn MessageStore>,
    pub ws_state: WebSocketState,
    auth: AuthState,
}

impl AppState {
    /// Wire the messaging core around the given store and directories.
    ///
    /// Live WebSocket rooms receive every event the message service publishes.
    pub fn from_parts(
        config: Config,
        store: Arc<dyn MessageStore>,
        orders: Arc<dyn OrderDirectory>,
        users: Arc<dyn UserDirectory>,
    ) -> Result<Self, ConfigError> {
        let auth = AuthState::new(&config.identity_header)?;

        let rooms = Arc::new(RoomManager::new());
        let ws_state = WebSocketState::with_rooms(Arc::clone(&rooms));
        let events: Arc<dyn EventSink> = rooms;

        let resolver = ConversationResolver::new(Arc::clone(&orders), users);
        let messages = MessageService::new(
            Arc::clone(&store),
            resolver,
            events,
            MessagingLimits {
                max_body_chars: config.max_message_length,
                default_page_size: config.default_page_size,
                max_page_size: config.max_page_size,
            },
        );
        let tickets = TicketAggregator::new(Arc::clone(&store), orders);

        Ok(Self {
            config,
            messages: Arc::new(messages),
            tickets: Arc::new(tickets),
            store,
            ws_state,
            auth,
        })
    }

    /// Connect the configured storage backend and build the state
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        match config.storage_backend {
            StorageBackend::Postgres => {
                let url = config
                    .database_url
                    .clone()
                    .ok_or(ConfigError::Missing("DATABASE_URL"))?;
                let pool =
                    gigdesk_shared::db::create_pool(&url, config.database_max_connections).await?;
                tracing::info!("Database connection established");

                if config.run_migrations {
                    gigdesk_shared::db::run_migrations(&pool).await?;
                    tracing::info!("Database migrations applied");
                }

                let directory = Arc::new(PgDirectory::new(pool.clone()));
                Ok(Self::from_parts(
                    config,
                    Arc::new(PgMessageStore::new(pool)),
                    directory.clone(),
                    directory,
                )?)
            }
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage; messages are lost on restart");
                let directory = Arc::new(MemoryDirectory::new());
                if let Some(path) = &config.memory_seed_path {
                    let raw = tokio::fs::read(path)
                        .await
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    let seed: MemorySeed = serde_json::from_slice(&raw)
                        .with_context(|| format!("Invalid memory seed {}", path.display()))?;
                    tracing::info!(
                        users = seed.users.len(),
                        orders = seed.orders.len(),
                        "Seeding in-memory directory"
                    );
                    directory.seed(seed).await;
                }
                Ok(Self::from_parts(
                    config,
                    Arc::new(MemoryMessageStore::new()),
                    directory.clone(),
                    directory,
                )?)
            }
        }
    }

    /// Get the auth state for middleware
    pub fn auth_state(&self) -> AuthState {
        self.auth.clone()
    }
}
