use anyhow::Context;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub page_size: usize,
}

impl Config {
    /// Reads settings from the environment, after loading `.env` if present.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = lookup("DATABASE_URL")
            .context("DATABASE_URL must be set to a production Postgres instance")?;

        let max_connections = match lookup("OIRS_DB_MAX_CONNECTIONS") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("OIRS_DB_MAX_CONNECTIONS is not a number: {raw}"))?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let page_size = match lookup("OIRS_PAGE_SIZE") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("OIRS_PAGE_SIZE is not a number: {raw}"))?,
            None => DEFAULT_PAGE_SIZE,
        };

        Ok(Self {
            database_url,
            max_connections,
            page_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_url_is_set() {
        let config =
            Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/oirs")])).unwrap();
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.page_size, 20);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/oirs"),
            ("OIRS_DB_MAX_CONNECTIONS", "12"),
            ("OIRS_PAGE_SIZE", "50"),
        ]))
        .unwrap();
        assert_eq!(config.max_connections, 12);
        assert_eq!(config.page_size, 50);
    }

    #[test]
    fn missing_url_or_bad_number_fails() {
        assert!(Config::from_lookup(lookup(&[])).is_err());
        assert!(Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/oirs"),
            ("OIRS_PAGE_SIZE", "many"),
        ]))
        .is_err());
    }
}
