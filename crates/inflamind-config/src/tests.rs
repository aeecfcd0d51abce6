#[cfg(test)]
mod tests {
    use super::super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_defaults_without_file() {
        let config = Config::default();
        assert_eq!(config.gemini.model, "gemini-2.5-flash");
        assert!(config.gemini.search_grounding);
        assert!(!config.has_api_key());
        assert_eq!(config.assistant.empty_answer, DEFAULT_EMPTY_ANSWER);
        assert_eq!(config.assistant.suggested_queries.len(), 4);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [gemini]
            model = "gemini-2.5-pro"
            "#,
        )
        .unwrap();
        assert_eq!(config.gemini.model, "gemini-2.5-pro");
        assert_eq!(config.gemini.base_url, default_base_url());
        assert_eq!(config.assistant.fallback_answer, DEFAULT_FALLBACK_ANSWER);
    }

    #[test]
    fn test_blank_key_in_file_counts_as_missing() {
        let config = Config::from_toml_str(
            r#"
            [gemini]
            api_key = "   "
            "#,
        )
        .unwrap();
        assert!(!config.has_api_key());
    }

    #[test]
    fn test_env_key_fills_missing_key() {
        let config = Config::default().with_env_api_key(|name| match name {
            "API_KEY" => Some("AIza-from-env".to_string()),
            _ => None,
        });
        let key = config.gemini.api_key.as_ref().unwrap();
        assert_eq!(key.expose_secret(), "AIza-from-env");
    }

    #[test]
    fn test_specific_env_var_wins_over_generic() {
        let config = Config::default().with_env_api_key(|name| match name {
            "INFLAMIND_GEMINI_API_KEY" => Some("specific".to_string()),
            "API_KEY" => Some("generic".to_string()),
            _ => None,
        });
        assert_eq!(config.gemini.api_key.unwrap().expose_secret(), "specific");
    }

    #[test]
    fn test_file_key_is_not_overridden_by_env() {
        let config = Config::from_toml_str(
            r#"
            [gemini]
            api_key = "from-file"
            "#,
        )
        .unwrap()
        .with_env_api_key(|_| Some("from-env".to_string()));
        assert_eq!(config.gemini.api_key.unwrap().expose_secret(), "from-file");
    }

    #[test]
    fn test_debug_output_redacts_key() {
        let config = Config::default().with_env_api_key(|_| Some("AIza-secret".to_string()));
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("AIza-secret"));
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(Config::from_toml_str("[gemini\nmodel = ").is_err());
    }

    /// `load` reads INFLAMIND_CONFIG from the process environment, so tests
    /// that set it must not overlap.
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn with_config_path<T>(path: &std::path::Path, f: impl FnOnce() -> T) -> T {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let previous = std::env::var_os("INFLAMIND_CONFIG");
        std::env::set_var("INFLAMIND_CONFIG", path);
        let out = f();
        match previous {
            Some(v) => std::env::set_var("INFLAMIND_CONFIG", v),
            None => std::env::remove_var("INFLAMIND_CONFIG"),
        }
        out
    }

    #[test]
    fn test_load_reads_file_named_by_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inflamind.toml");
        std::fs::write(
            &path,
            r#"
            [gemini]
            model = "gemini-2.5-pro"
            api_key = "AIza-from-file"
            "#,
        )
        .unwrap();

        let config = with_config_path(&path, Config::load).unwrap();
        assert_eq!(config.gemini.model, "gemini-2.5-pro");
        assert_eq!(config.gemini.api_key.unwrap().expose_secret(), "AIza-from-file");
        assert_eq!(config.assistant.welcome_message, DEFAULT_WELCOME_MESSAGE);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.toml");

        let config = with_config_path(&path, Config::load).unwrap();
        assert_eq!(config.gemini.model, default_model());
        assert_eq!(config.gemini.base_url, default_base_url());
        assert!(config.gemini.search_grounding);
        assert_eq!(config.assistant.suggested_queries, default_suggested_queries());
    }
}
