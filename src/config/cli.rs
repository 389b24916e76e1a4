use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

use crate::domain::content::{PostId, PostStatus};

/// Command-line arguments for the CloudCache binary.
#[derive(Debug, Parser)]
#[command(
    name = "cloudcache",
    version,
    about = "CloudCache purge and CDN rewriting for a content site"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "CLOUDCACHE_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Purge the whole site, or one URL or path.
    Purge(PurgeArgs),
    /// Replay a content event through the purge table.
    Event(EventArgs),
    /// Print the CDN URL for each image URL.
    #[command(name = "rewrite-url")]
    RewriteUrl(RewriteUrlArgs),
    /// Rewrite image URLs in an HTML fragment read from a file or stdin.
    #[command(name = "rewrite-html")]
    RewriteHtml(RewriteHtmlArgs),
    /// Run the credential capture and live endpoints.
    Serve(Box<ServeArgs>),
    /// Print a signed token for the live events endpoint.
    Nonce,
}

/// Overrides accepted before any subcommand.
#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the site's home URL.
    #[arg(long = "home-url", value_name = "URL")]
    pub home_url: Option<String>,

    /// Override the CDN base domain.
    #[arg(long = "cdn-domain", value_name = "DOMAIN")]
    pub cdn_domain: Option<String>,

    /// Override the content snapshot file.
    #[arg(long = "content-file", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub content_file: Option<PathBuf>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Clone)]
pub struct PurgeArgs {
    /// Absolute URL or path below the home URL; omit to purge everything.
    #[arg(value_name = "URL")]
    pub target: Option<String>,

    /// Purge everything beneath the target.
    #[arg(long, action = clap::ArgAction::SetTrue, requires = "target")]
    pub wildcard: bool,
}

#[derive(Debug, Args, Clone)]
pub struct EventArgs {
    /// Event name, e.g. `save_post` or `transition_post_status`.
    #[arg(value_name = "NAME")]
    pub name: String,

    #[arg(long = "post-id", value_name = "ID")]
    pub post_id: Option<PostId>,

    #[arg(long = "new-status", value_name = "STATUS")]
    pub new_status: Option<PostStatus>,

    #[arg(long = "old-status", value_name = "STATUS")]
    pub old_status: Option<PostStatus>,
}

#[derive(Debug, Args, Clone)]
pub struct RewriteUrlArgs {
    #[arg(value_name = "URL", required = true, num_args = 1..)]
    pub urls: Vec<String>,
}

#[derive(Debug, Args, Clone)]
pub struct RewriteHtmlArgs {
    /// Input file; stdin when omitted.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,
}
