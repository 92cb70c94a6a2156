use crate::core::{AppConfig, ConfigStore, Favorite, LogSink, StreamError, StreamResult};
use std::sync::{Arc, Mutex, MutexGuard};

struct RegistryState {
    store: ConfigStore,
    config: AppConfig,
}

/// Named endpoint credentials backed by the config document.
///
/// All mutations go through one lock and the whole document is written back
/// immediately after each successful change. A failed save is logged and the
/// in-memory state is kept.
#[derive(Clone)]
pub struct FavoritesRegistry {
    state: Arc<Mutex<RegistryState>>,
    log: LogSink,
}

impl FavoritesRegistry {
    pub fn open(store: ConfigStore, log: LogSink) -> Self {
        let config = store.load();
        log::debug!("Loaded {} favorites from {}", config.favorites.len(), store.path().display());
        Self {
            state: Arc::new(Mutex::new(RegistryState { store, config })),
            log,
        }
    }

    pub fn list(&self) -> Vec<Favorite> {
        self.lock().config.favorites.clone()
    }

    /// Snapshot of the whole document.
    pub fn config(&self) -> AppConfig {
        self.lock().config.clone()
    }

    pub fn last_stream_key(&self) -> String {
        self.lock().config.last_stream_key.clone()
    }

    pub fn add(&self, favorite: Favorite) -> StreamResult<()> {
        let favorite = match validated(favorite) {
            Ok(favorite) => favorite,
            Err(e) => return self.fail(e),
        };

        let mut state = self.lock();
        if state.config.favorites.iter().any(|f| f.name == favorite.name) {
            drop(state);
            return self.fail(StreamError::DuplicateName(favorite.name));
        }

        let name = favorite.name.clone();
        state.config.favorites.push(favorite);
        normalize_selection(&mut state.config);
        self.persist(&state);
        drop(state);

        self.log.info(format!("Favorite '{}' added.", name));
        Ok(())
    }

    /// Replaces the entry called `original_name`, possibly renaming it.
    pub fn update(&self, original_name: &str, favorite: Favorite) -> StreamResult<()> {
        let favorite = match validated(favorite) {
            Ok(favorite) => favorite,
            Err(e) => return self.fail(e),
        };

        let mut state = self.lock();
        let Some(index) = state.config.favorites.iter().position(|f| f.name == original_name) else {
            drop(state);
            return self.fail(StreamError::NotFound(original_name.to_string()));
        };
        if favorite.name != original_name
            && state.config.favorites.iter().any(|f| f.name == favorite.name)
        {
            drop(state);
            return self.fail(StreamError::DuplicateName(favorite.name));
        }

        let new_name = favorite.name.clone();
        state.config.favorites[index] = favorite;
        if state.config.last_favorite_name.as_deref() == Some(original_name) {
            state.config.last_favorite_name = Some(new_name.clone());
        }
        normalize_selection(&mut state.config);
        self.persist(&state);
        drop(state);

        self.log.info(format!("Favorite '{}' updated to '{}'.", original_name, new_name));
        Ok(())
    }

    pub fn remove(&self, name: &str) -> StreamResult<()> {
        let mut state = self.lock();
        let before = state.config.favorites.len();
        state.config.favorites.retain(|f| f.name != name);
        if state.config.favorites.len() == before {
            drop(state);
            return self.fail(StreamError::NotFound(name.to_string()));
        }

        normalize_selection(&mut state.config);
        self.persist(&state);
        drop(state);

        self.log.info(format!("Favorite '{}' removed.", name));
        Ok(())
    }

    /// Marks `name` as the favorite that pre-fills the start form.
    pub fn select(&self, name: &str) -> StreamResult<Favorite> {
        let mut state = self.lock();
        let Some(favorite) = state.config.favorites.iter().find(|f| f.name == name).cloned() else {
            drop(state);
            return self.fail(StreamError::NotFound(name.to_string()));
        };

        state.config.last_favorite_name = Some(favorite.name.clone());
        self.persist(&state);
        drop(state);

        self.log.info(format!("Favorite '{}' selected.", favorite.name));
        Ok(favorite)
    }

    pub fn selected(&self) -> Option<Favorite> {
        let state = self.lock();
        let name = state.config.last_favorite_name.as_deref()?;
        state.config.favorites.iter().find(|f| f.name == name).cloned()
    }

    /// Re-applies the startup selection rule: keep the last used favorite if it still
    /// exists, otherwise fall back to the first one, or to none when the list is empty.
    pub fn restore_selection(&self) -> Option<Favorite> {
        let mut state = self.lock();
        if normalize_selection(&mut state.config) {
            self.persist(&state);
        }
        let name = state.config.last_favorite_name.clone()?;
        state.config.favorites.iter().find(|f| f.name == name).cloned()
    }

    /// Records the credential and favorite of a session that started successfully.
    pub fn remember_start(&self, credential: &str, favorite_name: Option<&str>) {
        let mut state = self.lock();
        let favorite_name = favorite_name
            .filter(|name| state.config.favorites.iter().any(|f| f.name == *name))
            .map(str::to_string);
        state.config.last_stream_key = credential.to_string();
        state.config.last_favorite_name = favorite_name;
        self.persist(&state);
    }

    fn persist(&self, state: &RegistryState) {
        if let Err(e) = state.store.save(&state.config) {
            self.log.error(format!("Failed to save config: {}", e));
        }
    }

    fn fail<T>(&self, error: StreamError) -> StreamResult<T> {
        self.log.error(error.to_string());
        Err(error)
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn validated(favorite: Favorite) -> StreamResult<Favorite> {
    let favorite = Favorite::new(favorite.name.trim(), favorite.url.trim(), favorite.key.trim());
    if favorite.name.is_empty() {
        return Err(StreamError::MissingField("Name"));
    }
    if favorite.url.is_empty() {
        return Err(StreamError::MissingField("Server URL"));
    }
    if favorite.key.is_empty() {
        return Err(StreamError::MissingField("Stream key"));
    }
    Ok(favorite)
}

/// Returns true when `last_favorite_name` had to change.
fn normalize_selection(config: &mut AppConfig) -> bool {
    let current_is_valid = config
        .last_favorite_name
        .as_deref()
        .is_some_and(|name| config.favorites.iter().any(|f| f.name == name));
    if current_is_valid {
        return false;
    }

    let fallback = config.favorites.first().map(|f| f.name.clone());
    let changed = config.last_favorite_name != fallback;
    config.last_favorite_name = fallback;
    changed
}
