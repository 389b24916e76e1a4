use std::{process, sync::Arc};

use cloudcache::{
    application::{cycle::PurgeCycle, error::AppError, repos::CredentialSource},
    cache::{EventTable, PurgeTrigger, SiteEvent},
    cdn::{AttachmentCache, CdnRewriter, rewrite_html},
    config::{self, EventArgs, PurgeArgs, RewriteHtmlArgs, RewriteUrlArgs, Settings},
    domain::purge::{ExecutionContext, PurgeTarget},
    infra::{
        content::StaticContent,
        credentials::{HeaderCredentials, OverrideCredentials, RoundTripRefresher, StoredCredentials},
        error::InfraError,
        http::{self, EVENTS_NONCE_ACTION, HttpState},
        nonce::NonceSigner,
        purge_api::{PurgeApiClient, PurgeApiConfig, detect_hostname, user_from_document_root},
        store::FileStore,
        telemetry,
    },
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, chain = ?error.report().messages, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Purge(args) => run_purge(settings, args).await,
        config::Command::Event(args) => run_event(settings, args).await,
        config::Command::RewriteUrl(args) => run_rewrite_url(settings, args).await,
        config::Command::RewriteHtml(args) => run_rewrite_html(settings, args).await,
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Nonce => run_nonce(&settings),
    }
}

async fn run_purge(settings: Settings, args: PurgeArgs) -> Result<(), AppError> {
    let content = load_content(&settings).await?;
    let trigger = PurgeTrigger::new(EventTable::from(&settings.events));
    let dispatcher = PurgeApiClient::new(
        purge_api_config(&settings),
        ExecutionContext::Cli,
        stored_credentials(&settings)?,
    )?;

    let mut cycle = PurgeCycle::begin(settings.site.clone(), &trigger, &content);
    match args.target.as_deref() {
        None => cycle.purge_everything(),
        Some(target) => {
            let url = settings.site.resolve_url(target);
            let target = if args.wildcard {
                PurgeTarget::beneath(&url)
            } else {
                PurgeTarget::exact(url)
            };
            info!(purge_target = %target, "Purging single target");
            cycle.purge_target(target);
        }
    }

    let outcome = cycle.finish(&dispatcher).await;
    println!("{outcome}");
    Ok(())
}

async fn run_event(settings: Settings, args: EventArgs) -> Result<(), AppError> {
    let event = SiteEvent::from_parts(&args.name, args.post_id, args.new_status, args.old_status)?;
    let content = load_content(&settings).await?;
    let trigger = PurgeTrigger::new(EventTable::from(&settings.events));
    let dispatcher = PurgeApiClient::new(
        purge_api_config(&settings),
        ExecutionContext::Cli,
        stored_credentials(&settings)?,
    )?;

    let mut cycle = PurgeCycle::begin(settings.site.clone(), &trigger, &content);
    match cycle.handle(&event).await {
        Some(handler) => info!(event = %event.kind(), handler = ?handler, "Event applied"),
        None => info!(event = %event.kind(), "Event produced no purge targets"),
    }
    let outcome = cycle.finish(&dispatcher).await;
    println!("{outcome}");
    Ok(())
}

async fn run_rewrite_url(settings: Settings, args: RewriteUrlArgs) -> Result<(), AppError> {
    let content = load_content(&settings).await?;
    let cdn_domain = cdn_domain(&settings).await?;
    let cache = AttachmentCache::new();
    let rewriter = CdnRewriter::new(&settings.site, cdn_domain.as_deref(), &content, &cache);

    for url in &args.urls {
        println!("{}", rewriter.rewrite_url(url));
    }
    Ok(())
}

async fn run_rewrite_html(settings: Settings, args: RewriteHtmlArgs) -> Result<(), AppError> {
    let html = match args.file.as_ref() {
        Some(path) => tokio::fs::read_to_string(path).await.map_err(InfraError::from)?,
        None => {
            let mut buffer = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buffer)
                .await
                .map_err(InfraError::from)?;
            buffer
        }
    };

    let content = load_content(&settings).await?;
    let cdn_domain = cdn_domain(&settings).await?;
    let cache = AttachmentCache::new();
    let rewriter = CdnRewriter::new(&settings.site, cdn_domain.as_deref(), &content, &cache);
    let rewritten = rewrite_html(&rewriter, &html);

    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(rewritten.as_bytes())
        .await
        .map_err(InfraError::from)?;
    stdout.flush().await.map_err(InfraError::from)?;
    Ok(())
}

fn run_nonce(settings: &Settings) -> Result<(), AppError> {
    let secret = settings.credentials.nonce_secret.clone().ok_or_else(|| {
        AppError::validation("credentials.nonce_secret is required to sign event batches")
    })?;
    println!("{}", NonceSigner::new(secret).create(EVENTS_NONCE_ACTION));
    Ok(())
}

async fn run_serve(settings: Settings) -> Result<(), AppError> {
    let secret = settings.credentials.nonce_secret.clone().ok_or_else(|| {
        AppError::validation("credentials.nonce_secret is required to run the capture endpoint")
    })?;
    let content = load_content(&settings).await?;
    let purge = PurgeApiClient::new(
        purge_api_config(&settings),
        ExecutionContext::Http,
        Arc::new(HeaderCredentials::default()),
    )?;

    let state = HttpState {
        origin: Arc::new(settings.site.clone()),
        store: FileStore::new(&settings.credentials.store_dir),
        signer: NonceSigner::new(secret),
        trigger: Arc::new(PurgeTrigger::new(EventTable::from(&settings.events))),
        content: Arc::new(content),
        purge: Arc::new(purge),
        purge_key_override: settings.credentials.purge_key.clone(),
        cdn_domain_override: cdn_override(&settings),
    };

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;
    info!(addr = %settings.server.addr, "Listening");

    axum::serve(listener, http::build_router(state).into_make_service())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

async fn load_content(settings: &Settings) -> Result<StaticContent, AppError> {
    let Some(path) = settings.content.snapshot.as_ref() else {
        return Ok(StaticContent::empty());
    };
    let content = StaticContent::load(path).await?;
    info!(snapshot = %path.display(), posts = content.post_count(), "Content snapshot loaded");
    Ok(content)
}

/// Credentials for command-line runs: configuration first, then the store,
/// refreshed through the site when a nonce secret is configured.
fn stored_credentials(settings: &Settings) -> Result<Arc<dyn CredentialSource>, AppError> {
    let refresher = match settings.credentials.nonce_secret.as_ref() {
        Some(secret) if settings.credentials.refresh => Some(Arc::new(RoundTripRefresher::new(
            settings.site.home_page(),
            NonceSigner::new(secret.clone()),
            settings.credentials.refresh_timeout,
            settings.credentials.verify_tls,
        )?)),
        _ => None,
    };
    let stored: Arc<dyn CredentialSource> = Arc::new(StoredCredentials::new(
        FileStore::new(&settings.credentials.store_dir),
        refresher,
    ));
    Ok(Arc::new(OverrideCredentials::new(
        settings.credentials.purge_key.clone(),
        cdn_override(settings),
        stored,
    )))
}

fn cdn_override(settings: &Settings) -> Option<String> {
    if settings.cdn.enabled {
        settings.cdn.domain.clone()
    } else {
        None
    }
}

async fn cdn_domain(settings: &Settings) -> Result<Option<String>, AppError> {
    if !settings.cdn.enabled {
        return Ok(None);
    }
    Ok(stored_credentials(settings)?.cdn_domain().await)
}

fn purge_api_config(settings: &Settings) -> PurgeApiConfig {
    let purge = &settings.purge;
    let user = purge
        .user
        .clone()
        .or_else(|| {
            purge
                .document_root
                .as_deref()
                .and_then(user_from_document_root)
        })
        .or_else(|| {
            std::env::current_dir()
                .ok()
                .and_then(|dir| user_from_document_root(&dir.to_string_lossy()))
        })
        .unwrap_or_default();

    PurgeApiConfig {
        endpoint: purge.endpoint.clone(),
        timeout: purge.timeout,
        verify_tls: purge.verify_tls,
        enabled: purge.enabled,
        server_hostname: purge.server_hostname.clone().unwrap_or_else(detect_hostname),
        required_host_marker: purge.required_host_marker.clone(),
        user,
        plugin_version: purge.plugin_version.clone(),
    }
}
