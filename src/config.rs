use crate::aggregate::AlertThresholds;
use crate::error::ConfigError;
use crate::generator::{Bounds, GenerationRanges};
use crate::reading::{KnownEquipment, DEFAULT_EQUIPMENT_IDS};
use dotenvy::dotenv;
use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_DB_PORT: u16 = 5432;
const DEFAULT_SSL_MODE: &str = "require";

/// Where the store lives. Either a full URL or the discrete `DB_*` settings.
#[derive(Clone, PartialEq)]
pub enum DatabaseConfig {
    Url(String),
    Parts {
        host: String,
        database: String,
        user: String,
        password: Option<String>,
        port: u16,
        ssl_mode: String,
    },
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> Result<PgConnectOptions, ConfigError> {
        match self {
            DatabaseConfig::Url(url) => PgConnectOptions::from_str(url).map_err(|err| {
                ConfigError::invalid("TELEMETRY_DATABASE_URL", "<redacted>", err.to_string())
            }),
            DatabaseConfig::Parts {
                host,
                database,
                user,
                password,
                port,
                ssl_mode,
            } => {
                let ssl_mode = PgSslMode::from_str(ssl_mode).map_err(|err| {
                    ConfigError::invalid("DB_SSLMODE", ssl_mode.clone(), err.to_string())
                })?;
                let mut options = PgConnectOptions::new()
                    .host(host)
                    .port(*port)
                    .database(database)
                    .username(user)
                    .ssl_mode(ssl_mode);
                if let Some(password) = password {
                    options = options.password(password);
                }
                Ok(options)
            }
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseConfig::Url(_) => f.write_str("Url(<redacted>)"),
            DatabaseConfig::Parts {
                host,
                database,
                user,
                port,
                ssl_mode,
                ..
            } => f
                .debug_struct("Parts")
                .field("host", host)
                .field("database", database)
                .field("user", user)
                .field("password", &"<redacted>")
                .field("port", port)
                .field("ssl_mode", ssl_mode)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SetupConfigOverrides {
    #[serde(default)]
    ingest_interval_ms: Option<u64>,
    #[serde(default)]
    refresh_interval_ms: Option<u64>,
    #[serde(default)]
    window_size: Option<usize>,
    #[serde(default)]
    equipment_ids: Option<Vec<String>>,
    #[serde(default)]
    temperature_critical: Option<f64>,
    #[serde(default)]
    vibration_critical: Option<f64>,
    #[serde(default)]
    throughput_minimum: Option<i32>,
}

fn load_setup_config_overrides(path: Option<PathBuf>) -> SetupConfigOverrides {
    let Some(path) = path else {
        return SetupConfigOverrides::default();
    };
    if !path.exists() {
        return SetupConfigOverrides::default();
    }
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to read setup config; using env defaults"
            );
            return SetupConfigOverrides::default();
        }
    };
    let mut bytes = contents.into_bytes();
    match simd_json::serde::from_slice(&mut bytes) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to parse setup config; using env defaults"
            );
            SetupConfigOverrides::default()
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database: DatabaseConfig,
    pub connect_timeout_ms: u64,
    pub operation_timeout_ms: u64,
    pub ingest_interval_ms: u64,
    pub equipment: KnownEquipment,
    pub rng_seed: Option<u64>,
    pub ranges: GenerationRanges,
    pub refresh_interval_ms: u64,
    pub window_size: usize,
    pub thresholds: AlertThresholds,
    pub otlp_endpoint: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup. Env values win over the setup file.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup: &lookup };
        let overrides =
            load_setup_config_overrides(vars.optional("TELEMETRY_SETUP_CONFIG_PATH").map(PathBuf::from));

        let database = database_config(&vars)?;

        let connect_timeout_ms = vars.positive_u64("TELEMETRY_CONNECT_TIMEOUT_MS", None, 8_000)?;
        let operation_timeout_ms =
            vars.positive_u64("TELEMETRY_OPERATION_TIMEOUT_MS", None, 5_000)?;
        let ingest_interval_ms = vars.positive_u64(
            "TELEMETRY_INGEST_INTERVAL_MS",
            overrides.ingest_interval_ms,
            2_000,
        )?;
        let refresh_interval_ms = vars.positive_u64(
            "TELEMETRY_REFRESH_INTERVAL_MS",
            overrides.refresh_interval_ms,
            5_000,
        )?;

        let window_size = vars.parsed("TELEMETRY_WINDOW_SIZE", overrides.window_size, 50usize)?;
        if window_size == 0 {
            return Err(ConfigError::invalid(
                "TELEMETRY_WINDOW_SIZE",
                "0",
                "must be greater than zero",
            ));
        }

        let equipment = match vars.optional("TELEMETRY_EQUIPMENT_IDS") {
            Some(raw) => KnownEquipment::new(raw.split(',')),
            None => match overrides.equipment_ids.as_ref() {
                Some(ids) => KnownEquipment::new(ids),
                None => KnownEquipment::new(DEFAULT_EQUIPMENT_IDS),
            },
        };
        if equipment.is_empty() {
            return Err(ConfigError::Missing("TELEMETRY_EQUIPMENT_IDS"));
        }

        let rng_seed = match vars.optional("TELEMETRY_RNG_SEED") {
            Some(raw) => Some(raw.parse::<u64>().map_err(|err| {
                ConfigError::invalid("TELEMETRY_RNG_SEED", raw.clone(), err.to_string())
            })?),
            None => None,
        };

        let defaults = GenerationRanges::default();
        let ranges = GenerationRanges {
            temperature: vars.bounds("TELEMETRY_TEMPERATURE_RANGE", defaults.temperature)?,
            vibration: vars.bounds("TELEMETRY_VIBRATION_RANGE", defaults.vibration)?,
            throughput: vars.bounds("TELEMETRY_THROUGHPUT_RANGE", defaults.throughput)?,
        };
        ranges.validate()?;

        let default_thresholds = AlertThresholds::default();
        let thresholds = AlertThresholds {
            temperature_critical: vars.finite_f64(
                "TELEMETRY_TEMPERATURE_CRITICAL",
                overrides.temperature_critical,
                default_thresholds.temperature_critical,
            )?,
            vibration_critical: vars.finite_f64(
                "TELEMETRY_VIBRATION_CRITICAL",
                overrides.vibration_critical,
                default_thresholds.vibration_critical,
            )?,
            throughput_minimum: vars.parsed(
                "TELEMETRY_THROUGHPUT_MINIMUM",
                overrides.throughput_minimum,
                default_thresholds.throughput_minimum,
            )?,
        };

        let otlp_endpoint = vars.optional("OTEL_EXPORTER_OTLP_ENDPOINT");

        Ok(Self {
            database,
            connect_timeout_ms,
            operation_timeout_ms,
            ingest_interval_ms,
            equipment,
            rng_seed,
            ranges,
            refresh_interval_ms,
            window_size,
            thresholds,
            otlp_endpoint,
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn ingest_interval(&self) -> Duration {
        Duration::from_millis(self.ingest_interval_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

fn database_config(vars: &Vars<'_>) -> Result<DatabaseConfig, ConfigError> {
    if let Some(url) = vars
        .optional("TELEMETRY_DATABASE_URL")
        .or_else(|| vars.optional("DATABASE_URL"))
    {
        let config = DatabaseConfig::Url(normalize_database_url(url));
        config.connect_options()?;
        return Ok(config);
    }

    let host = vars
        .optional("DB_HOST")
        .ok_or(ConfigError::Missing("TELEMETRY_DATABASE_URL, DATABASE_URL or DB_HOST"))?;
    let database = vars.optional("DB_NAME").ok_or(ConfigError::Missing("DB_NAME"))?;
    let user = vars.optional("DB_USER").ok_or(ConfigError::Missing("DB_USER"))?;
    let password = vars.optional("DB_PASS");
    let port = vars.parsed("DB_PORT", None, DEFAULT_DB_PORT)?;
    let ssl_mode = vars
        .optional("DB_SSLMODE")
        .unwrap_or_else(|| DEFAULT_SSL_MODE.to_string());

    let config = DatabaseConfig::Parts {
        host,
        database,
        user,
        password,
        port,
        ssl_mode,
    };
    config.connect_options()?;
    Ok(config)
}

fn normalize_database_url(url: String) -> String {
    if let Some(stripped) = url.strip_prefix("postgresql+psycopg://") {
        return format!("postgresql://{stripped}");
    }
    if let Some(stripped) = url.strip_prefix("postgresql+psycopg2://") {
        return format!("postgresql://{stripped}");
    }
    if let Some(stripped) = url.strip_prefix("postgresql+asyncpg://") {
        return format!("postgresql://{stripped}");
    }
    url
}

struct Vars<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Vars<'_> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parsed<T>(&self, key: &'static str, fallback: Option<T>, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.optional(key) {
            Some(raw) => raw
                .parse::<T>()
                .map_err(|err| ConfigError::invalid(key, raw.clone(), err.to_string())),
            None => Ok(fallback.unwrap_or(default)),
        }
    }

    fn positive_u64(&self, key: &'static str, fallback: Option<u64>, default: u64) -> Result<u64, ConfigError> {
        let value = self.parsed(key, fallback, default)?;
        if value == 0 {
            return Err(ConfigError::invalid(key, "0", "must be greater than zero"));
        }
        Ok(value)
    }

    fn finite_f64(&self, key: &'static str, fallback: Option<f64>, default: f64) -> Result<f64, ConfigError> {
        let value = self.parsed(key, fallback, default)?;
        if !value.is_finite() {
            return Err(ConfigError::invalid(key, value.to_string(), "must be finite"));
        }
        Ok(value)
    }

    /// `min..max`, inclusive.
    fn bounds<T>(&self, key: &'static str, default: Bounds<T>) -> Result<Bounds<T>, ConfigError>
    where
        T: FromStr + PartialOrd + Copy,
        T::Err: fmt::Display,
    {
        let Some(raw) = self.optional(key) else {
            return Ok(default);
        };
        let (min, max) = raw
            .split_once("..")
            .ok_or_else(|| ConfigError::invalid(key, raw.clone(), "expected min..max"))?;
        let min = min
            .trim()
            .parse::<T>()
            .map_err(|err| ConfigError::invalid(key, raw.clone(), err.to_string()))?;
        let max = max
            .trim()
            .trim_start_matches('=')
            .parse::<T>()
            .map_err(|err| ConfigError::invalid(key, raw.clone(), err.to_string()))?;
        if min > max {
            return Err(ConfigError::invalid(key, raw, "min must not exceed max"));
        }
        Ok(Bounds::new(min, max))
    }
}
