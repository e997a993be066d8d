use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};

use crate::auth::AuthConfig;
use crate::chat::ChatRelay;
use crate::config::ServerConfig;
use crate::games::ServerGameRegistry;
use crate::matchmaking::MatchmakingQueue;
use crate::presence::ConnectionRegistry;
use crate::rate_limit::IpRateLimiter;
use crate::room_manager::RoomStore;
use crate::session::SessionSettings;

pub type SharedRoomStore = Arc<RwLock<RoomStore>>;
pub type SharedMatchmaking = Arc<Mutex<MatchmakingQueue>>;
/// Locks per thread internally.
pub type SharedChat = Arc<ChatRelay>;

/// Lock order when more than one is needed: matchmaking, then the room
/// store, then a single room, then the registry. A chat thread is taken
/// alone and only ever nests the relay's own maps and the registry.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub rooms: SharedRoomStore,
    pub matchmaking: SharedMatchmaking,
    pub chat: SharedChat,
    pub games: Arc<ServerGameRegistry>,
    pub auth: AuthConfig,
    pub config: Arc<ServerConfig>,
    pub ws_connection_count: Arc<AtomicUsize>,
    pub ws_per_ip: Arc<std::sync::Mutex<HashMap<IpAddr, usize>>>,
    pub api_rate_limiter: Arc<IpRateLimiter>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let auth = AuthConfig {
            bearer_token: config.auth.bearer_token.clone(),
        };
        let api_rate_limiter = IpRateLimiter::new(
            config.limits.api_rate_limit_burst as f64,
            config.limits.api_rate_limit_per_sec,
        );
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            rooms: Arc::new(RwLock::new(RoomStore::new())),
            matchmaking: Arc::new(Mutex::new(MatchmakingQueue::new())),
            chat: Arc::new(ChatRelay::new(config.chat.max_message_len)),
            games: Arc::new(ServerGameRegistry::new()),
            auth,
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
            ws_per_ip: Arc::new(std::sync::Mutex::new(HashMap::new())),
            api_rate_limiter: Arc::new(api_rate_limiter),
            started_at: Instant::now(),
            config: Arc::new(config),
        }
    }

    /// Per-room policy derived from the config.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            disconnect_grace: Duration::from_secs(self.config.rooms.disconnect_grace_secs),
            alternate_first_mover: self.config.rooms.alternate_first_mover,
        }
    }
}

/// Counts a live WebSocket connection for as long as it is held.
pub struct ConnectionGuard {
    count: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    pub fn new(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::Relaxed);
        Self { count }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Holds one of an IP's connection slots.
pub struct IpConnectionGuard {
    ip: IpAddr,
    slots: Arc<std::sync::Mutex<HashMap<IpAddr, usize>>>,
}

impl IpConnectionGuard {
    /// Take a slot for `ip`, or `None` if it already holds `max`.
    pub fn try_acquire(
        ip: IpAddr,
        slots: Arc<std::sync::Mutex<HashMap<IpAddr, usize>>>,
        max: usize,
    ) -> Option<Self> {
        {
            let mut map = slots.lock().unwrap_or_else(PoisonError::into_inner);
            let count = map.entry(ip).or_insert(0);
            if *count >= max {
                return None;
            }
            *count += 1;
        }
        Some(Self { ip, slots })
    }
}

impl Drop for IpConnectionGuard {
    fn drop(&mut self) {
        let mut map = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = map.get_mut(&self.ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                map.remove(&self.ip);
            }
        }
    }
}
