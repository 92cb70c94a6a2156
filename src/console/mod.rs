//! Line-oriented operator console.
//!
//! Holds the start form (video path, server URL, stream key, chosen favorite) and
//! turns typed commands into calls on the registry and the session controller.
//! Event log entries are printed by a separate subscriber thread, see
//! [`spawn_log_printer`].

pub mod command;

use crate::core::{FavoritesRegistry, LogEntry, LogSink};
use crate::stream::SessionController;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::thread;
use tokio::sync::broadcast::{self, error::RecvError};

pub use command::{parse, Command, USAGE};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartForm {
    pub video_path: String,
    pub server_url: String,
    pub stream_key: String,
    pub favorite: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Console {
    registry: FavoritesRegistry,
    controller: Arc<SessionController>,
    log: LogSink,
    form: StartForm,
}

impl Console {
    pub fn new(registry: FavoritesRegistry, controller: Arc<SessionController>, log: LogSink) -> Self {
        let mut console = Self {
            registry,
            controller,
            log,
            form: StartForm::default(),
        };
        console.registry.restore_selection();
        console.sync_selection();
        console
    }

    pub fn form(&self) -> &StartForm {
        &self.form
    }

    /// Reads commands until `quit` or end of input, then stops any active stream.
    pub fn run(&mut self, input: impl BufRead, out: &mut impl Write) -> anyhow::Result<()> {
        writeln!(out, "Type 'help' for a list of commands.")?;
        for line in input.lines() {
            let line = line?;
            match parse(&line) {
                Ok(Some(command)) => {
                    if self.execute(command, out)? == Flow::Quit {
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(usage) => writeln!(out, "{}", usage)?,
            }
        }
        self.controller.shutdown();
        Ok(())
    }

    pub fn execute(&mut self, command: Command, out: &mut impl Write) -> anyhow::Result<Flow> {
        match command {
            Command::Path(path) => self.form.video_path = path,
            Command::Url(url) => {
                self.form.server_url = url;
                self.form.favorite = None;
            }
            Command::Key(key) => {
                self.form.stream_key = key;
                self.form.favorite = None;
            }
            Command::Use(name) => {
                if let Ok(favorite) = self.registry.select(&name) {
                    self.form.server_url = favorite.url;
                    self.form.stream_key = favorite.key;
                    self.form.favorite = Some(favorite.name);
                }
            }
            Command::Start => self.start(),
            Command::Stop => {
                self.controller.stop();
            }
            Command::Status => self.print_status(out)?,
            Command::Favorites => self.print_favorites(out)?,
            Command::AddFavorite(favorite) => {
                if self.registry.add(favorite).is_ok() {
                    self.sync_selection();
                }
            }
            Command::EditFavorite { original, favorite } => {
                if self.registry.update(&original, favorite).is_ok() {
                    self.sync_selection();
                }
            }
            Command::RemoveFavorite(name) => {
                if self.registry.remove(&name).is_ok() {
                    self.sync_selection();
                }
            }
            Command::History => {
                for entry in self.log.entries() {
                    writeln!(out, "{}", entry.file_line())?;
                }
            }
            Command::Help => writeln!(out, "{}", USAGE)?,
            Command::Quit => {
                self.controller.shutdown();
                return Ok(Flow::Quit);
            }
        }
        Ok(Flow::Continue)
    }

    fn start(&self) {
        let form = &self.form;
        if self
            .controller
            .start(&form.video_path, &form.server_url, &form.stream_key)
            .is_ok()
        {
            self.registry.remember_start(&form.stream_key, form.favorite.as_deref());
        }
    }

    /// Refills the url and key from the selected favorite, or falls back to the
    /// last used stream key when there is none.
    fn sync_selection(&mut self) {
        match self.registry.selected() {
            Some(favorite) => {
                self.form.server_url = favorite.url;
                self.form.stream_key = favorite.key;
                self.form.favorite = Some(favorite.name);
            }
            None => {
                self.form.server_url.clear();
                self.form.stream_key = self.registry.last_stream_key();
                self.form.favorite = None;
            }
        }
    }

    fn print_status(&self, out: &mut impl Write) -> anyhow::Result<()> {
        let state = self.controller.poll();
        let snapshot = self.controller.snapshot();
        writeln!(out, "State:     {:?}", state)?;
        if let Some(source) = &snapshot.source {
            writeln!(out, "Source:    {}", source)?;
        }
        if let Some(endpoint) = &snapshot.endpoint {
            writeln!(out, "Endpoint:  {}", endpoint)?;
        }
        if let Some(pid) = snapshot.pid {
            writeln!(out, "PID:       {}", pid)?;
        }
        if let Some(started_at) = snapshot.started_at {
            writeln!(out, "Since:     {}", started_at.format("%Y-%m-%d %H:%M:%S"))?;
        }
        if state.can_start() {
            writeln!(
                out,
                "Form:      path='{}' url='{}' favorite={}",
                self.form.video_path,
                self.form.server_url,
                self.form.favorite.as_deref().unwrap_or("-")
            )?;
        }
        Ok(())
    }

    fn print_favorites(&self, out: &mut impl Write) -> anyhow::Result<()> {
        let favorites = self.registry.list();
        if favorites.is_empty() {
            writeln!(out, "No favorites saved.")?;
            return Ok(());
        }
        for favorite in favorites {
            let marker = if self.form.favorite.as_deref() == Some(favorite.name.as_str()) { "*" } else { " " };
            writeln!(out, "{} {:<16} {:<40} {}", marker, favorite.name, favorite.url, favorite.masked_key())?;
        }
        Ok(())
    }
}

/// Prints every new log entry to stdout until the sink goes away.
pub fn spawn_log_printer(mut entries: broadcast::Receiver<LogEntry>) -> thread::JoinHandle<()> {
    thread::spawn(move || loop {
        match entries.blocking_recv() {
            Ok(entry) => println!("{}", entry),
            Err(RecvError::Lagged(skipped)) => {
                println!("... {} log lines skipped, see 'history'", skipped)
            }
            Err(RecvError::Closed) => break,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ConfigStore, Favorite};
    use crate::stream::testing::{FakeExtractor, FakeLauncher, FakeScript};
    use crate::stream::{ProcessSupervisor, SessionState, SourceResolver};
    use std::time::Duration;

    struct Setup {
        console: Console,
        launcher: Arc<FakeLauncher>,
        controller: Arc<SessionController>,
        store: ConfigStore,
        dir: tempfile::TempDir,
    }

    fn setup_with(config: Option<crate::core::AppConfig>) -> Setup {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("config.json"));
        if let Some(config) = config {
            store.save(&config).unwrap();
        }
        let log = LogSink::in_memory();
        let launcher = Arc::new(FakeLauncher::new(FakeScript::running(vec![])));
        let supervisor = ProcessSupervisor::new(launcher.clone(), None)
            .with_grace_period(Duration::from_millis(200));
        let controller = Arc::new(SessionController::new(
            SourceResolver::new(Arc::new(FakeExtractor::answering("https://cdn.example/v"))),
            supervisor,
            log.clone(),
        ));
        let registry = FavoritesRegistry::open(store.clone(), log.clone());
        let console = Console::new(registry, Arc::clone(&controller), log);
        Setup { console, launcher, controller, store, dir }
    }

    fn run(console: &mut Console, script: &str) -> String {
        let mut out = Vec::new();
        console.run(script.as_bytes(), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_form_prefills_from_last_favorite() {
        let mut config = crate::core::AppConfig::default();
        config.favorites = vec![
            Favorite::new("A", "rtmps://x", "k1"),
            Favorite::new("B", "rtmps://y", "k2"),
        ];
        config.last_favorite_name = Some("B".to_string());
        let s = setup_with(Some(config));

        assert_eq!(s.console.form().server_url, "rtmps://y");
        assert_eq!(s.console.form().stream_key, "k2");
        assert_eq!(s.console.form().favorite.as_deref(), Some("B"));
    }

    #[test]
    fn test_form_falls_back_to_last_stream_key() {
        let mut config = crate::core::AppConfig::default();
        config.last_stream_key = "remembered".to_string();
        let s = setup_with(Some(config));

        assert_eq!(s.console.form().stream_key, "remembered");
        assert!(s.console.form().server_url.is_empty());
    }

    #[test]
    fn test_start_and_quit_with_favorite() {
        let mut s = setup_with(None);
        let video = s.dir.path().join("v.mp4");
        std::fs::write(&video, b"x").unwrap();

        let script = format!(
            "fav add A rtmps://x k1\nuse A\npath {}\nstart\nstatus\nquit\n",
            video.display()
        );
        let out = run(&mut s.console, &script);

        assert!(out.contains("State:     Streaming"));
        assert_eq!(s.launcher.spawn_count(), 1);
        assert_eq!(s.launcher.last_invocation().unwrap().destination(), "rtmps://x/k1");
        assert_eq!(s.controller.state(), SessionState::Idle);
        assert_eq!(s.launcher.live_processes(), 0);

        let saved = s.store.load();
        assert_eq!(saved.last_stream_key, "k1");
        assert_eq!(saved.last_favorite_name.as_deref(), Some("A"));
    }

    #[test]
    fn test_end_of_input_stops_stream() {
        let mut s = setup_with(None);
        let video = s.dir.path().join("v.mp4");
        std::fs::write(&video, b"x").unwrap();

        let script = format!("path {}\nurl rtmps://x\nkey manual\nstart\n", video.display());
        run(&mut s.console, &script);

        assert_eq!(s.launcher.spawn_count(), 1);
        assert_eq!(s.controller.state(), SessionState::Idle);
        assert_eq!(s.store.load().last_stream_key, "manual");
        assert!(s.store.load().last_favorite_name.is_none());
    }

    #[test]
    fn test_failed_start_does_not_remember_key() {
        let mut s = setup_with(None);

        run(&mut s.console, "path /not/here.mp4\nurl rtmps://x\nkey k9\nstart\n");

        assert_eq!(s.launcher.spawn_count(), 0);
        assert_eq!(s.store.load().last_stream_key, "");
    }

    #[test]
    fn test_favorites_listing_masks_keys() {
        let mut s = setup_with(None);

        let out = run(&mut s.console, "favs\nfav add Main rtmps://x 123456789012345\nfavs\n");

        assert!(out.contains("No favorites saved."));
        assert!(out.contains("1234567890..."));
        assert!(!out.contains("123456789012345"));
        assert!(out.contains("* Main"));
    }

    #[test]
    fn test_removing_selected_favorite_clears_form() {
        let mut s = setup_with(None);

        run(&mut s.console, "fav add A rtmps://x k1\nfav rm A\n");

        assert!(s.console.form().favorite.is_none());
        assert!(s.console.form().server_url.is_empty());
    }

    #[test]
    fn test_unknown_command_prints_hint() {
        let mut s = setup_with(None);
        let out = run(&mut s.console, "launch\n");
        assert!(out.contains("Unknown command 'launch'"));
    }
}
