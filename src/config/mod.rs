//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{DEFAULT_FULL_SITE_EVENTS, DEFAULT_POST_EVENTS};
use crate::domain::site::SiteOrigin;
use crate::infra::purge_api::{DEFAULT_PURGE_ENDPOINT, DEFAULT_PURGE_TIMEOUT};

pub use cli::{
    CliArgs, Command, EventArgs, GlobalOverrides, PurgeArgs, RewriteHtmlArgs, RewriteUrlArgs,
    ServeArgs, ServeOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "cloudcache";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3080;
const DEFAULT_STORE_DIR: &str = "data";
const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 15;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub site: SiteOrigin,
    pub purge: PurgeSettings,
    pub cdn: CdnSettings,
    pub credentials: CredentialSettings,
    pub events: EventSettings,
    pub content: ContentSettings,
    pub server: ServerSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct PurgeSettings {
    pub enabled: bool,
    pub endpoint: String,
    pub timeout: Duration,
    pub verify_tls: bool,
    /// Account reported to the purge service; derived from the document root
    /// when unset.
    pub user: Option<String>,
    pub document_root: Option<String>,
    /// Local hostname; detected at startup when unset.
    pub server_hostname: Option<String>,
    pub required_host_marker: Option<String>,
    pub plugin_version: String,
}

#[derive(Debug, Clone)]
pub struct CdnSettings {
    pub enabled: bool,
    /// Fixed CDN domain; otherwise taken from the edge.
    pub domain: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CredentialSettings {
    pub store_dir: PathBuf,
    pub nonce_secret: Option<String>,
    /// Fixed purge key; otherwise taken from the edge.
    pub purge_key: Option<String>,
    /// Whether a store miss triggers the signed round trip.
    pub refresh: bool,
    pub refresh_timeout: Duration,
    pub verify_tls: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSettings {
    pub post: Vec<String>,
    pub full_site: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ContentSettings {
    /// JSON snapshot exported by the content system.
    pub snapshot: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("CLOUDCACHE")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("events.post")
            .with_list_parse_key("events.full_site")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    raw.apply_global_overrides(&cli.overrides);
    if let Some(Command::Serve(args)) = cli.command.as_ref() {
        raw.apply_serve_overrides(&args.overrides);
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    site: RawSiteSettings,
    purge: RawPurgeSettings,
    cdn: RawCdnSettings,
    credentials: RawCredentialSettings,
    events: RawEventSettings,
    content: RawContentSettings,
    server: RawServerSettings,
    logging: RawLoggingSettings,
}

impl RawSettings {
    fn apply_global_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(home_url) = overrides.home_url.as_ref() {
            self.site.home_url = Some(home_url.clone());
        }
        if let Some(domain) = overrides.cdn_domain.as_ref() {
            self.cdn.domain = Some(domain.clone());
        }
        if let Some(path) = overrides.content_file.as_ref() {
            self.content.snapshot = Some(path.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            site,
            purge,
            cdn,
            credentials,
            events,
            content,
            server,
            logging,
        } = raw;

        Ok(Self {
            site: build_site(site)?,
            purge: build_purge_settings(purge)?,
            cdn: build_cdn_settings(cdn),
            credentials: build_credential_settings(credentials)?,
            events: build_event_settings(events),
            content: ContentSettings {
                snapshot: content.snapshot,
            },
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
        })
    }
}

fn build_site(site: RawSiteSettings) -> Result<SiteOrigin, LoadError> {
    let home_url = non_empty(site.home_url)
        .ok_or_else(|| LoadError::invalid("site.home_url", "a home URL is required"))?;
    let secure = site
        .secure
        .unwrap_or_else(|| home_url.to_ascii_lowercase().starts_with("https://"));
    let origin = SiteOrigin::new(&home_url, secure)
        .map_err(|err| LoadError::invalid("site.home_url", err.to_string()))?;
    Ok(match non_empty(site.uploads_url) {
        Some(uploads_url) => origin.with_uploads_url(&uploads_url),
        None => origin,
    })
}

fn build_purge_settings(purge: RawPurgeSettings) -> Result<PurgeSettings, LoadError> {
    let timeout = match purge.timeout_seconds {
        Some(0) => {
            return Err(LoadError::invalid(
                "purge.timeout_seconds",
                "must be greater than zero",
            ));
        }
        Some(seconds) => Duration::from_secs(seconds),
        None => DEFAULT_PURGE_TIMEOUT,
    };

    Ok(PurgeSettings {
        enabled: purge.enabled.unwrap_or(true),
        endpoint: non_empty(purge.endpoint).unwrap_or_else(|| DEFAULT_PURGE_ENDPOINT.to_string()),
        timeout,
        verify_tls: purge.verify_tls.unwrap_or(true),
        user: non_empty(purge.user),
        document_root: non_empty(purge.document_root),
        server_hostname: non_empty(purge.server_hostname),
        required_host_marker: non_empty(purge.required_host_marker),
        plugin_version: non_empty(purge.plugin_version)
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
    })
}

fn build_cdn_settings(cdn: RawCdnSettings) -> CdnSettings {
    CdnSettings {
        enabled: cdn.enabled.unwrap_or(true),
        domain: non_empty(cdn.domain),
    }
}

fn build_credential_settings(
    credentials: RawCredentialSettings,
) -> Result<CredentialSettings, LoadError> {
    let refresh_timeout = match credentials.refresh_timeout_seconds {
        Some(0) => {
            return Err(LoadError::invalid(
                "credentials.refresh_timeout_seconds",
                "must be greater than zero",
            ));
        }
        Some(seconds) => Duration::from_secs(seconds),
        None => Duration::from_secs(DEFAULT_REFRESH_TIMEOUT_SECS),
    };

    let nonce_secret = non_empty(credentials.nonce_secret);
    if let Some(secret) = nonce_secret.as_ref()
        && secret.len() < 16
    {
        return Err(LoadError::invalid(
            "credentials.nonce_secret",
            "must be at least 16 characters",
        ));
    }

    Ok(CredentialSettings {
        store_dir: credentials
            .store_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR)),
        nonce_secret,
        purge_key: non_empty(credentials.purge_key),
        refresh: credentials.refresh.unwrap_or(true),
        refresh_timeout,
        verify_tls: credentials.verify_tls.unwrap_or(true),
    })
}

fn build_event_settings(events: RawEventSettings) -> EventSettings {
    let names = |configured: Option<Vec<String>>, defaults: &[&str]| -> Vec<String> {
        match configured {
            Some(list) => list
                .into_iter()
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect(),
            None => defaults.iter().map(|name| name.to_string()).collect(),
        }
    };
    EventSettings {
        post: names(events.post, &DEFAULT_POST_EVENTS),
        full_site: names(events.full_site, &DEFAULT_FULL_SITE_EVENTS),
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    Ok(ServerSettings { addr })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSiteSettings {
    home_url: Option<String>,
    secure: Option<bool>,
    uploads_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPurgeSettings {
    enabled: Option<bool>,
    endpoint: Option<String>,
    timeout_seconds: Option<u64>,
    verify_tls: Option<bool>,
    user: Option<String>,
    document_root: Option<String>,
    server_hostname: Option<String>,
    required_host_marker: Option<String>,
    plugin_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCdnSettings {
    enabled: Option<bool>,
    domain: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCredentialSettings {
    store_dir: Option<PathBuf>,
    nonce_secret: Option<String>,
    purge_key: Option<String>,
    refresh: Option<bool>,
    refresh_timeout_seconds: Option<u64>,
    verify_tls: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEventSettings {
    post: Option<Vec<String>>,
    full_site: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawContentSettings {
    snapshot: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
