use std::path::Path;
use std::sync::Arc;

use ack_crypto::{SigningKey, VerifyingKey};
use ack_delivery::{
    EmailHandler, HttpMailTransport, LogTransport, MagicLinkCleanup, MailTransport, PlainRenderer,
    SessionCleanup, WebhookFanout, WebhookHandler, WorkerFleet, EMAIL_QUEUE, WEBHOOK_QUEUE,
};
use ack_ledger::{
    AuditReport, AuditStatus, ChainVerifier, EventReplayer, FileKey, KeyProvider, ReplayReport,
};
use ack_postgres::{PgCredentials, PgLedger, PgPool, PgWebhookRegistry, PgWorkQueue};
use ack_types::{TenantId, WorkerItem};
use ack_worker::{QueueJob, SweepJob, WorkQueue, WorkerEngine};
use anyhow::{bail, Context};
use colored::Colorize;
use tracing::{info, info_span};

use crate::cli::*;
use crate::config::AckdConfig;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Keygen(args) => cmd_keygen(&args, cli.format),
        Command::Serve(args) => cmd_serve(&AckdConfig::load(&cli.config)?, &args).await,
        Command::Verify(args) => cmd_verify(&AckdConfig::load(&cli.config)?, &args, cli.format).await,
        Command::DeadLetters(args) => {
            cmd_dead_letters(&AckdConfig::load(&cli.config)?, &args, cli.format).await
        }
        Command::ReplayEvents(args) => {
            cmd_replay(&AckdConfig::load(&cli.config)?, &args, cli.format).await
        }
    }
}

async fn open_pool(config: &AckdConfig) -> anyhow::Result<PgPool> {
    ack_postgres::connect(&config.database)
        .await
        .context("connecting to the database")
}

async fn cmd_serve(config: &AckdConfig, args: &ServeArgs) -> anyhow::Result<()> {
    let pool = open_pool(config).await?;
    if !args.no_migrate {
        ack_postgres::migrate(&pool).await.context("running migrations")?;
        info!("schema up to date");
    }

    if let Some(path) = &config.signing.key_file {
        let key = FileKey::new(path).signing_key()?;
        info!(public_key = %key.verifying_key().to_hex(), "signing key loaded");
    }

    let registry = Arc::new(PgWebhookRegistry::new(pool.clone()));
    let webhook_queue = Arc::new(PgWorkQueue::new(pool.clone(), WEBHOOK_QUEUE));
    let email_queue = Arc::new(PgWorkQueue::new(pool.clone(), EMAIL_QUEUE));
    let credentials = Arc::new(PgCredentials::new(pool.clone()));
    let fanout = Arc::new(WebhookFanout::new(
        Arc::clone(&webhook_queue),
        Arc::clone(&registry),
    ));

    let webhook = config.webhook.worker();
    let webhook_handler = WebhookHandler::new(Arc::clone(&registry), &config.webhook)
        .context("building webhook HTTP client")?;
    let webhook_engine = WorkerEngine::new(
        QueueJob::new(
            WEBHOOK_QUEUE,
            webhook_queue,
            Arc::new(webhook_handler),
            webhook.queue(),
        ),
        webhook.engine(),
    )
    .with_span(info_span!("webhook"));

    let email = config.email.worker();
    let transport: Arc<dyn MailTransport> = match &config.email.relay {
        Some(relay) => Arc::new(
            HttpMailTransport::new(relay.clone(), &config.email)
                .context("building mail relay client")?,
        ),
        None => Arc::new(LogTransport),
    };
    let email_handler = EmailHandler::new(
        Arc::new(PlainRenderer),
        transport,
        fanout,
        config.email.from.clone(),
    );
    let email_engine = WorkerEngine::new(
        QueueJob::new(EMAIL_QUEUE, email_queue, Arc::new(email_handler), email.queue()),
        email.engine(),
    )
    .with_span(info_span!("email"));

    let sessions_engine = WorkerEngine::new(
        SweepJob::new(Arc::new(SessionCleanup::new(Arc::clone(&credentials)))),
        config.sessions.worker().engine(),
    )
    .with_span(info_span!("sessions"));

    let links_engine = WorkerEngine::new(
        SweepJob::new(Arc::new(MagicLinkCleanup::new(
            credentials,
            config.magic_links.window(),
        ))),
        config.magic_links.worker().engine(),
    )
    .with_span(info_span!("magic_links"));

    // Stopped in reverse: sweepers, then email (which feeds webhooks), then webhooks.
    let fleet = WorkerFleet::new()
        .with(webhook_engine)
        .with(email_engine)
        .with(sessions_engine)
        .with(links_engine);
    fleet.start_all().await.context("starting workers")?;
    println!(
        "{} ackd running: {}",
        "✓".green().bold(),
        fleet.names().join(", ").bold()
    );

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("shutdown requested");
    fleet.stop_all().await;
    pool.close().await;
    Ok(())
}

fn verifying_key(config: &AckdConfig, args: &VerifyArgs) -> anyhow::Result<VerifyingKey> {
    if let Some(hex) = &args.public_key {
        return VerifyingKey::from_hex(hex).context("parsing --public-key");
    }
    let Some(path) = &config.signing.key_file else {
        bail!("no --public-key given and no [signing] key_file configured");
    };
    Ok(FileKey::new(path).signing_key()?.verifying_key())
}

async fn cmd_verify(
    config: &AckdConfig,
    args: &VerifyArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let key = verifying_key(config, args)?;
    let pool = open_pool(config).await?;
    let verifier = ChainVerifier::new(Arc::new(PgLedger::new(pool)), key, config.ledger.digest);

    let reports = match &args.doc {
        Some(doc) => vec![verifier.audit(doc).await?],
        None => verifier.audit_all().await?,
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
        OutputFormat::Text => {
            for report in &reports {
                println!("{}", render_audit(report));
            }
        }
    }

    let broken = reports
        .iter()
        .filter(|r| r.status == AuditStatus::Broken)
        .count();
    if broken > 0 {
        bail!("{broken} of {} chain(s) broken", reports.len());
    }
    Ok(())
}

fn render_audit(report: &AuditReport) -> String {
    match (report.status, report.broken_at_index, report.reason) {
        (AuditStatus::Ok, _, _) => format!(
            "{} {} ({} records)",
            "✓".green().bold(),
            report.doc_id.bold(),
            report.record_count
        ),
        (AuditStatus::Broken, index, reason) => format!(
            "{} {} broken at index {}: {} ({} records)",
            "✗".red().bold(),
            report.doc_id.bold(),
            index.map_or_else(|| "?".to_string(), |i| i.to_string()).yellow(),
            reason.map_or_else(|| "unknown".to_string(), |r| r.to_string()),
            report.record_count
        ),
    }
}

fn cmd_keygen(args: &KeygenArgs, format: OutputFormat) -> anyhow::Result<()> {
    let public = write_key(&args.out, args.force)?;
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({"keyFile": args.out, "publicKey": public.to_hex()})
        ),
        OutputFormat::Text => {
            println!("{} Wrote signing key to {}", "✓".green().bold(), args.out.display());
            println!("  Public key: {}", public.to_hex().cyan());
        }
    }
    Ok(())
}

/// Generate a key, write its hex form to `path` and return the public half.
fn write_key(path: &Path, force: bool) -> anyhow::Result<VerifyingKey> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let key = SigningKey::generate();
    std::fs::write(path, key.to_hex())
        .with_context(|| format!("writing {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("restricting permissions of {}", path.display()))?;
    }
    Ok(key.verifying_key())
}

async fn cmd_dead_letters(
    config: &AckdConfig,
    args: &DeadLettersArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let tenant = TenantId::new(args.tenant.clone())?;
    let queue_name = match args.queue {
        QueueName::Webhook => WEBHOOK_QUEUE,
        QueueName::Email => EMAIL_QUEUE,
    };
    let pool = open_pool(config).await?;
    let queue = PgWorkQueue::new(pool, queue_name);
    let items = queue.list_dead(&tenant, args.limit).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&items)?),
        OutputFormat::Text if items.is_empty() => {
            println!("No dead letters in {} for {}.", queue_name.bold(), tenant)
        }
        OutputFormat::Text => {
            for item in &items {
                println!("{}", render_dead_letter(item));
            }
        }
    }
    Ok(())
}

fn render_dead_letter(item: &WorkerItem) -> String {
    format!(
        "{} {} attempts={} key={} died={} error={}",
        item.id.short_id().yellow(),
        item.kind.bold(),
        item.attempt,
        item.idempotency_key,
        item.completed_at
            .map_or_else(|| "-".to_string(), |at| at.to_rfc3339()),
        item.last_error.as_deref().unwrap_or("-").red()
    )
}

async fn cmd_replay(
    config: &AckdConfig,
    args: &ReplayArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let pool = open_pool(config).await?;
    let fanout = WebhookFanout::new(
        Arc::new(PgWorkQueue::new(pool.clone(), WEBHOOK_QUEUE)),
        Arc::new(PgWebhookRegistry::new(pool.clone())),
    );
    let replayer = EventReplayer::new(Arc::new(PgLedger::new(pool)), Arc::new(fanout))
        .with_span(info_span!("replay"));

    let report = match &args.doc {
        Some(doc) => replayer.replay_document(doc).await?,
        None => replayer.replay_all().await?,
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => println!("{}", render_replay(&report)),
    }
    if report.failed > 0 {
        bail!("{} event(s) could not be published", report.failed);
    }
    Ok(())
}

fn render_replay(report: &ReplayReport) -> String {
    format!(
        "{} Replayed {} document(s): {} published, {} failed",
        if report.failed == 0 { "✓".green().bold() } else { "✗".red().bold() },
        report.documents,
        report.published,
        report.failed
    )
}
