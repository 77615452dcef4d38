use super::{WebhookCallback, ANY_ROOM_ID};
use crate::platform_api::types::PlatformError;
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug)]
struct RegistryState {
    known_rooms: HashSet<String>,
    subscriptions: HashMap<String, HashMap<String, WebhookCallback>>,
}

/// Event subscriptions keyed by event name and room id
///
/// Room ids are validated against the known room list, which always contains
/// [`ANY_ROOM_ID`]. Registering the same `(event, room)` again replaces the
/// earlier callback.
#[derive(Debug)]
pub struct WebhookRegistry {
    state: RwLock<RegistryState>,
}

impl Default for WebhookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookRegistry {
    pub fn new() -> Self {
        let mut known_rooms = HashSet::new();
        known_rooms.insert(ANY_ROOM_ID.to_string());
        Self {
            state: RwLock::new(RegistryState {
                known_rooms,
                subscriptions: HashMap::new(),
            }),
        }
    }

    // Writers never panic while holding the lock, so a poisoned lock still
    // guards consistent data.
    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the known room list; [`ANY_ROOM_ID`] is always kept
    pub fn set_known_rooms<I>(&self, room_ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut known_rooms: HashSet<String> = room_ids.into_iter().collect();
        known_rooms.insert(ANY_ROOM_ID.to_string());
        tracing::debug!("Known rooms updated: {} entries", known_rooms.len());
        self.write().known_rooms = known_rooms;
    }

    /// Known room ids, sorted
    pub fn known_rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.read().known_rooms.iter().cloned().collect();
        rooms.sort();
        rooms
    }

    /// True until a real room list has been loaded
    pub fn has_only_default_room(&self) -> bool {
        let state = self.read();
        state.known_rooms.len() == 1 && state.known_rooms.contains(ANY_ROOM_ID)
    }

    /// Subscribe `callback` to `event` in each of `room_ids`
    ///
    /// An empty `room_ids` subscribes to any room. Fails with `NoRoom` if any
    /// id is unknown, in which case nothing is registered.
    pub fn register(
        &self,
        event: &str,
        room_ids: &[&str],
        callback: WebhookCallback,
    ) -> Result<(), PlatformError> {
        let room_ids: Vec<&str> = if room_ids.is_empty() {
            vec![ANY_ROOM_ID]
        } else {
            room_ids.to_vec()
        };

        let mut state = self.write();

        if let Some(unknown) = room_ids.iter().find(|id| !state.known_rooms.contains(**id)) {
            tracing::warn!("Refusing webhook registration for unknown room {}", unknown);
            return Err(PlatformError::NoRoom(format!(
                "Try to register wrong room id: '{}'",
                unknown
            )));
        }

        let rooms = state.subscriptions.entry(event.to_string()).or_default();
        for room_id in room_ids {
            rooms.insert(room_id.to_string(), callback.clone());
        }
        tracing::debug!("Registered callback for event {}", event);
        Ok(())
    }

    /// Callback for `event` in `room_id`: exact room first, then any room
    pub fn resolve(&self, event: &str, room_id: &str) -> Option<WebhookCallback> {
        let state = self.read();
        let rooms = state.subscriptions.get(event)?;
        rooms
            .get(room_id)
            .or_else(|| rooms.get(ANY_ROOM_ID))
            .cloned()
    }

    /// Subscribed event names, sorted
    pub fn events(&self) -> Vec<String> {
        let mut events: Vec<String> = self.read().subscriptions.keys().cloned().collect();
        events.sort();
        events
    }
}
