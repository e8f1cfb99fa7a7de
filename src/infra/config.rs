//! Settings read from the environment (or a `.env` file via `dotenvy`).

use {
    crate::domain::catalog::Catalog,
    std::{env, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration},
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key}: cannot parse {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("catalog {path}: {message}")]
    Catalog { path: String, message: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Absent means the in-process ledger (single instance, nothing persisted).
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub bind_addr: SocketAddr,
    /// HMAC-SHA256 key for `X-Signature`. Absent disables verification.
    pub webhook_secret: Option<String>,
    /// Bearer token for the admin/UI routes. Absent leaves them open.
    pub admin_token: Option<String>,
    pub catalog_path: PathBuf,
    /// Age after which an assigned slot is swept back to the pool.
    pub slot_window_days: u32,
    pub sweep_interval: Duration,
    /// Slots per service a user may hold when the plan sets no override.
    pub max_slots_per_user: u32,
    /// Keep keyword-matched purchases for manual confirmation instead of allocating.
    pub hold_fallback_matches: bool,
    pub expiry_notice_days: u32,
    /// How long a paid transaction with no outcome is left to its own
    /// delivery before manual reconciliation may take it over.
    pub reconcile_grace: Duration,
}

/// Environment-style source of raw settings. Blank values count as unset.
struct Settings<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Settings<F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn parsed<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.optional(key) {
            None => Ok(default),
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { key, value }),
        }
    }

    fn positive(&self, key: &'static str, default: u64) -> Result<u64, ConfigError> {
        match self.parsed(key, default)? {
            0 => Err(ConfigError::Invalid {
                key,
                value: "0".into(),
            }),
            n => Ok(n),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: 20,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            webhook_secret: None,
            admin_token: None,
            catalog_path: PathBuf::from("catalog.json"),
            slot_window_days: 30,
            sweep_interval: Duration::from_secs(3600),
            max_slots_per_user: 1,
            hold_fallback_matches: false,
            expiry_notice_days: 3,
            reconcile_grace: Duration::from_secs(300),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let settings = Settings { lookup };
        let defaults = Self::default();

        let max_slots_per_user =
            settings.positive("MAX_SLOTS_PER_USER", defaults.max_slots_per_user.into())?;
        let max_slots_per_user =
            u32::try_from(max_slots_per_user).map_err(|_| ConfigError::Invalid {
                key: "MAX_SLOTS_PER_USER",
                value: max_slots_per_user.to_string(),
            })?;

        Ok(Self {
            database_url: settings.optional("DATABASE_URL"),
            database_max_connections: settings.parsed(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            bind_addr: settings.parsed("BIND_ADDR", defaults.bind_addr)?,
            webhook_secret: settings.optional("WEBHOOK_SECRET"),
            admin_token: settings.optional("ADMIN_TOKEN"),
            catalog_path: settings
                .optional("CATALOG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.catalog_path),
            slot_window_days: settings.parsed("SLOT_WINDOW_DAYS", defaults.slot_window_days)?,
            sweep_interval: Duration::from_secs(
                settings.positive("SWEEP_INTERVAL_SECS", defaults.sweep_interval.as_secs())?,
            ),
            max_slots_per_user,
            hold_fallback_matches: settings.parsed(
                "HOLD_FALLBACK_MATCHES",
                defaults.hold_fallback_matches,
            )?,
            expiry_notice_days: settings
                .parsed("EXPIRY_NOTICE_DAYS", defaults.expiry_notice_days)?,
            reconcile_grace: Duration::from_secs(settings.parsed(
                "RECONCILE_GRACE_SECS",
                defaults.reconcile_grace.as_secs(),
            )?),
        })
    }

    pub fn load_catalog(&self) -> Result<Catalog, ConfigError> {
        let path = self.catalog_path.display().to_string();
        let json = std::fs::read_to_string(&self.catalog_path).map_err(|e| {
            ConfigError::Catalog {
                path: path.clone(),
                message: e.to_string(),
            }
        })?;
        Catalog::from_json(&json).map_err(|e| ConfigError::Catalog {
            path,
            message: e.to_string(),
        })
    }
}
