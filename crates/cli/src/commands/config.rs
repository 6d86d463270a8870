use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use expensa_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let api_token = match &config.notifications.api_token {
        Some(token) => redact_token(token.expose_secret()),
        None => "<unset>".to_string(),
    };

    let fields: Vec<(&str, String, &str)> = vec![
        ("database.url", config.database.url.clone(), "EXPENSA_DATABASE_URL"),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            "EXPENSA_DATABASE_MAX_CONNECTIONS",
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            "EXPENSA_DATABASE_TIMEOUT_SECS",
        ),
        ("server.bind_address", config.server.bind_address.clone(), "EXPENSA_SERVER_BIND_ADDRESS"),
        ("server.port", config.server.port.to_string(), "EXPENSA_SERVER_PORT"),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            "EXPENSA_SERVER_GRACEFUL_SHUTDOWN_SECS",
        ),
        (
            "notifications.enabled",
            config.notifications.enabled.to_string(),
            "EXPENSA_NOTIFICATIONS_ENABLED",
        ),
        (
            "notifications.webhook_url",
            config.notifications.webhook_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            "EXPENSA_NOTIFICATIONS_WEBHOOK_URL",
        ),
        ("notifications.api_token", api_token, "EXPENSA_NOTIFICATIONS_API_TOKEN"),
        (
            "notifications.from_address",
            config.notifications.from_address.clone(),
            "EXPENSA_NOTIFICATIONS_FROM_ADDRESS",
        ),
        (
            "approvals.missing_rule_policy",
            config.approvals.missing_rule_policy.as_str().to_string(),
            "EXPENSA_APPROVALS_MISSING_RULE_POLICY",
        ),
        (
            "approvals.default_min_approval_percentage",
            config.approvals.default_min_approval_percentage.percentage().to_string(),
            "EXPENSA_APPROVALS_DEFAULT_MIN_APPROVAL_PERCENTAGE",
        ),
        ("logging.level", config.logging.level.clone(), "EXPENSA_LOGGING_LEVEL"),
        ("logging.format", format!("{:?}", config.logging.format), "EXPENSA_LOGGING_FORMAT"),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_key) in &fields {
        let source = field_source(
            key,
            Some(*env_key),
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(key, value, source));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    ["expensa.toml", "config/expensa.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps the first four characters so operators can tell tokens apart.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    match trimmed.char_indices().nth(4) {
        Some((cut, _)) => format!("{}***", &trimmed[..cut]),
        None => "<redacted>".to_string(),
    }
}
