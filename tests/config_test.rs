use std::collections::HashMap;
use std::path::PathBuf;

use taskwire::config::{Config, ExposeSecret};
use taskwire::error::Error;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| vars.get(name).cloned()
}

#[test]
fn config_loads_required_fields_with_defaults() {
    let config = Config::from_lookup(lookup(&[("DATABASE_URL", "sqlite://taskwire.db")])).unwrap();

    assert_eq!(config.database_url.expose_secret(), "sqlite://taskwire.db");
    assert_eq!(config.log_level, "info");
    assert_eq!(config.feed_buffer, 256);
    assert_eq!(config.page_size, 50);
    assert!(config.otel_endpoint.is_none());
    assert!(config.catalog_dir.is_none());
    assert!(config.directory_file.is_none());
}

#[test]
fn config_fails_without_database_url() {
    let result = Config::from_lookup(lookup(&[("LOG_LEVEL", "debug")]));
    assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("DATABASE_URL")));
}

#[test]
fn config_reads_optional_settings() {
    let config = Config::from_lookup(lookup(&[
        ("DATABASE_URL", "sqlite::memory:"),
        ("OTEL_ENDPOINT", "http://localhost:4317"),
        ("LOG_LEVEL", "taskwire=debug"),
        ("TASKWIRE_CATALOG_DIR", "/etc/taskwire/catalog"),
        ("TASKWIRE_DIRECTORY_FILE", "/etc/taskwire/directory.toml"),
        ("TASKWIRE_FEED_BUFFER", " 32 "),
        ("TASKWIRE_PAGE_SIZE", "10"),
    ]))
    .unwrap();

    assert_eq!(config.otel_endpoint.as_deref(), Some("http://localhost:4317"));
    assert_eq!(config.log_level, "taskwire=debug");
    assert_eq!(config.catalog_dir, Some(PathBuf::from("/etc/taskwire/catalog")));
    assert_eq!(
        config.directory_file,
        Some(PathBuf::from("/etc/taskwire/directory.toml"))
    );
    assert_eq!(config.feed_buffer, 32);
    assert_eq!(config.page_size, 10);
}

#[test]
fn malformed_numbers_are_rejected() {
    let result = Config::from_lookup(lookup(&[
        ("DATABASE_URL", "sqlite::memory:"),
        ("TASKWIRE_FEED_BUFFER", "lots"),
    ]));
    assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("TASKWIRE_FEED_BUFFER")));
}

#[test]
fn config_from_env_fails_without_required() {
    unsafe {
        std::env::remove_var("DATABASE_URL");
    }
    assert!(Config::from_env().is_err());
}
