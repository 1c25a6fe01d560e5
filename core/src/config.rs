use std::fs::{read_to_string, write};

use anyhow::{Context, Result};

use crate::settings::AppSettings;

pub static CONFIG_PATH: &str = "config.toml";
pub static CREDENTIALS_PATH: &str = "credentials.toml";

/// Overwrites the (non-credentials) config file with operator-supplied
/// settings, as delivered over the `set_config` RPC.
pub fn save_settings(settings: &str, config_path: &str) -> Result<()> {
    write(config_path, settings).with_context(|| format!("unable to write settings file: {config_path}"))
}

/// Credentials (db url, external marketplace keys used only at process
/// start-up to seed the first operator, if any) live in a separate file from
/// the rest of the config so the latter can be committed to source control.
pub fn try_load_settings(config_path: &str, credentials_path: &str) -> Result<AppSettings> {
    let settings = read_to_string(config_path)
        .with_context(|| format!("unable to load settings file: {config_path}"))?;
    let credentials = read_to_string(credentials_path)
        .with_context(|| format!("unable to load credentials file: {credentials_path}"))?;

    parse_settings(&settings, &credentials)
}

pub fn parse_settings(settings: &str, credentials: &str) -> Result<AppSettings> {
    let mut doc: toml_edit::Document = settings.parse().context("unable to parse settings")?;
    let creds: toml_edit::Document = credentials.parse().context("unable to parse credentials")?;

    if let Some(db_url) = creds
        .as_table()
        .get("database")
        .and_then(|v| v.get("url"))
        .and_then(|v| v.as_str())
    {
        doc["core"]["database"]["url"] = toml_edit::value(db_url);
    }

    toml_edit::de::from_document::<AppSettings>(doc).context("unable to parse combined settings")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_credentials_url_into_settings() {
        let settings = r#"
            [core.database]
            max_connections = 5

            [core.order_timeouts]
            accept_secs = 120
            payment_secs = 900
            confirm_secs = 1800
            sweep_interval_secs = 10

            [core.deposit_reconciliation]
            interval_secs = 5
            lookback_days = 30

            [core.rate_cache]
            refresh_interval_secs = 30
            stale_after_secs = 120
        "#;
        let credentials = r#"
            [database]
            url = "postgres://localhost/lbmatch"
        "#;

        let parsed = parse_settings(settings, credentials).unwrap();
        assert_eq!(parsed.core.database.url, "postgres://localhost/lbmatch");
        assert_eq!(parsed.core.database.max_connections, 5);
    }
}
