use super::*;
use std::fs;
use tempfile::TempDir;

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn config_file_persistence() {
        let temp_dir = TempDir::new().expect("should create TempDir successfully");
        let config_path = temp_dir.path().join("config.toml");

        let mut original_config = Config::default();
        original_config.ollama = OllamaConfig {
            protocol: "https".to_string(),
            host: "test-host".to_string(),
            port: 8080,
            model: "test-model".to_string(),
            batch_size: 32,
            embedding_dimension: 768,
        };

        let toml_content = toml::to_string_pretty(&original_config)
            .expect("config should convert to toml string successfully");
        fs::write(&config_path, toml_content).expect("should write to config_path successfully");

        let content =
            fs::read_to_string(&config_path).expect("should read from config_path successfully");
        let loaded_config: Config = toml::from_str(&content).expect("should parse toml correctly");

        assert_eq!(original_config, loaded_config);
    }

    #[test]
    fn invalid_toml_handling() {
        let invalid_toml = r#"
            [ollama
            host = "localhost"
            port = "invalid_port"
        "#;

        let result: Result<Config, toml::de::Error> = toml::from_str(invalid_toml);
        assert!(result.is_err());
    }

    #[test]
    fn partial_config_with_defaults() {
        let partial_toml = r#"
            [ollama]
            host = "custom-host"

            [chunking]
            chunk_size = 300
        "#;

        let config: Config = toml::from_str(partial_toml).expect("partial config should parse");
        assert_eq!(config.ollama.host, "custom-host");
        assert_eq!(config.ollama.port, 11434);
        assert_eq!(config.chunking.chunk_size, 300);
        assert_eq!(config.chunking.overlap, 50);
        assert_eq!(config.retrieval.top_k, 5);
    }

    #[test]
    fn empty_host_is_invalid() {
        let mut config = Config::default();
        config.ollama.host = String::new();

        assert!(config.validate().is_err());
    }

    #[test]
    fn ollama_url_generation_with_different_hosts() {
        let configs = vec![
            ("http", "localhost", 11434, "http://localhost:11434/"),
            ("http", "127.0.0.1", 8080, "http://127.0.0.1:8080/"),
            (
                "https",
                "secure.example.com",
                443,
                "https://secure.example.com/",
            ),
        ];

        for (protocol, host, port, expected_url) in configs {
            let mut config = Config::default();
            config.ollama.protocol = protocol.to_string();
            config.ollama.host = host.to_string();
            config.ollama.port = port;

            let url = config.ollama_url().expect("ollama_url is ok");
            assert_eq!(url.as_str(), expected_url);
        }
    }

    #[test]
    fn error_display_messages() {
        let errors = vec![
            ConfigError::InvalidProtocol("ftp".to_string()),
            ConfigError::InvalidPort(0),
            ConfigError::InvalidBatchSize(0),
            ConfigError::InvalidModel(String::new()),
            ConfigError::InvalidUrl("invalid-url".to_string()),
            ConfigError::OverlapTooLarge(50, 50),
        ];

        for error in errors {
            let message = format!("{error}");
            assert!(message.len() > 10);
        }
    }
}
