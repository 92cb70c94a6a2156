#[cfg(test)]
mod tests {

    use std::path::PathBuf;
    use crate::core::{AppConfig, ConfigStore, Favorite};

    fn store_in(dir: &tempfile::TempDir) -> ConfigStore {
        ConfigStore::new(dir.path().join("config.json"))
    }

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.last_stream_key, "");
        assert!(config.favorites.is_empty());
        assert!(config.last_favorite_name.is_none());
        assert!(config.ffmpeg_path.is_none());
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        assert_eq!(store.load(), AppConfig::default());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_corrupted_file_loads_exact_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), "{ \"last_stream_key\": \"abc\", \"favorites\": [").unwrap();

        assert_eq!(store.load(), AppConfig::default());
    }

    #[test]
    fn test_save_then_load_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut config = AppConfig::default();
        config.last_stream_key = "k1".to_string();
        config.favorites.push(Favorite::new("A", "rtmps://x", "k1"));
        config.last_favorite_name = Some("A".to_string());
        config.ffmpeg_path = Some(PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));

        store.save(&config).unwrap();
        let loaded = store.load();
        assert_eq!(loaded, config);

        store.save(&loaded).unwrap();
        assert_eq!(store.load(), config);
    }

    #[test]
    fn test_missing_keys_are_filled_from_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), r#"{ "last_stream_key": "only-key" }"#).unwrap();

        let config = store.load();
        assert_eq!(config.last_stream_key, "only-key");
        assert!(config.favorites.is_empty());
        assert!(config.last_favorite_name.is_none());
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let json = r#"{
            "last_stream_key": "",
            "theme": "dark",
            "favorites": [ { "name": "A", "url": "rtmps://x", "key": "k1" } ]
        }"#;
        std::fs::write(store.path(), json).unwrap();

        let config = store.load();
        assert_eq!(config.favorites, vec![Favorite::new("A", "rtmps://x", "k1")]);
    }

    #[test]
    fn test_document_uses_original_field_names() {
        let mut config = AppConfig::default();
        config.favorites.push(Favorite::new("A", "rtmps://x", "k1"));
        let value = serde_json::to_value(&config).unwrap();

        assert_eq!(value["last_stream_key"], "");
        assert_eq!(value["favorites"][0]["url"], "rtmps://x");
        assert_eq!(value["favorites"][0]["key"], "k1");
        assert!(value.get("last_favorite_name").is_none());
    }

    #[test]
    fn test_save_creates_parent_directory_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("nested").join("config.json"));

        store.save(&AppConfig::default()).unwrap();

        assert!(store.path().exists());
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_masked_key() {
        assert_eq!(Favorite::new("A", "u", "short").masked_key(), "short");
        assert_eq!(Favorite::new("A", "u", "0123456789").masked_key(), "0123456789");
        assert_eq!(Favorite::new("A", "u", "0123456789abc").masked_key(), "0123456789...");
    }
}
