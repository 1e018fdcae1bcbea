//! Integration tests for trellis-config

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use trellis_config::{ConfigError, ConfigManager, ServerSettings};
use trellis_core::{Container, Error, Injectable, Provider, Registry, Resolver, Token};

fn write_temp(name: &str, content: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("trellis-config-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_builder_layers_files_then_env() {
    let base = write_temp(
        "base.toml",
        r#"
            name = "orders"

            [server]
            host = "127.0.0.1"
            port = 8080
            log_level = "debug"
        "#,
    );
    let overrides = write_temp("overrides.json", r#"{"server": {"port": 8181}}"#);

    let config = ConfigManager::builder()
        .default_value("server.log_format", "compact")
        .add_file(&base)
        .add_file(&overrides)
        .build()
        .unwrap();

    let settings = ServerSettings::from_config(&config).unwrap();
    assert_eq!(settings.port, 8181);
    assert_eq!(settings.log_level, "debug");
    assert_eq!(settings.log_format, "compact");
    assert_eq!(config.get_string("name").unwrap(), "orders");

    config.load_env_from(vec![(
        "SERVER__PORT".to_string(),
        "9191".to_string(),
    )]);
    assert_eq!(ServerSettings::from_config(&config).unwrap().port, 9191);
}

#[test]
fn test_unparseable_file_reports_parse_error() {
    let broken = write_temp("broken.toml", "[server\nport = ");
    let err = ConfigManager::new().load_file_auto(&broken).unwrap_err();
    assert!(matches!(err, ConfigError::ParseError(_)));
}

#[test]
fn test_config_error_converts_to_core_error() {
    let err: Error = ConfigError::KeyNotFound("database.url".to_string()).into();
    assert_eq!(err.status_code(), 500);
    assert!(err.to_string().contains("database.url"));
}

struct Greeter {
    config: Arc<ConfigManager>,
}

impl Provider for Greeter {}

impl Injectable for Greeter {
    fn construct(resolver: &mut Resolver<'_>) -> Result<Self, Error> {
        Ok(Greeter {
            config: resolver.get()?,
        })
    }
}

impl Greeter {
    fn greeting(&self) -> String {
        format!("hello from {}", self.config.get_or("name", "nobody".to_string()))
    }
}

#[test]
fn test_manager_is_injectable() {
    let config = ConfigManager::new();
    config.set("name", "billing").unwrap();

    let container = Container::new();
    container.register_instance(config.clone());
    container.register::<Greeter>(Default::default());

    let greeter = container.resolve::<Greeter>().unwrap();
    assert_eq!(greeter.greeting(), "hello from billing");

    // The container holds a clone that shares the same tree
    config.set("name", "payments").unwrap();
    assert_eq!(greeter.greeting(), "hello from payments");
}

#[test]
fn test_definition_installs_through_registry() {
    let registry = Registry::new();
    let config = ConfigManager::new();
    config.set("feature.enabled", true).unwrap();
    registry.add_provider(config.definition());

    let container = Container::new();
    registry.install(&container);

    let resolved = container
        .resolve_token::<ConfigManager>(&Token::of::<ConfigManager>())
        .unwrap();
    assert!(resolved.get_bool("feature.enabled").unwrap());
}
