use std::process::ExitCode;
use std::sync::Arc;

use recruiter_rm::config::Config;
use recruiter_rm::extractor::Extractor;
use recruiter_rm::llm::create_provider;
use recruiter_rm::mail::{ImapSmtpGateway, MailGateway};
use recruiter_rm::responder::{Responder, ResponderSettings, RunSummary};

#[tokio::main]
async fn main() -> ExitCode {
    // Install rustls crypto provider before any TLS usage; a second install
    // only fails if one is already set.
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = match Config::from_env().and_then(|c| c.preflight().map(|()| c)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    eprintln!("📬 recruiter-rm v{}", env!("CARGO_PKG_VERSION"));
    if config.dry_run {
        eprintln!("   DRY_RUN mode on");
    }
    if config.bypass_llm {
        eprintln!("   BYPASS_OPENAI mode on");
    }
    eprintln!(
        "   Mailbox: {} (IMAP {}, SMTP {})",
        config.mailbox.source_folder, config.mailbox.imap_host, config.mailbox.smtp_host
    );

    match run(&config).await {
        Ok(summary) => {
            eprintln!(
                "   Done: {} candidates, {} sent, {} dry-run, {} failed",
                summary.candidates, summary.sent, summary.dry_run, summary.failed
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &Config) -> recruiter_rm::Result<RunSummary> {
    let extractor = match &config.llm {
        Some(llm_config) => Extractor::new(create_provider(llm_config)?, llm_config.max_tokens),
        None => Extractor::bypass(),
    };

    let gateway = Arc::new(
        ImapSmtpGateway::connect(&config.mailbox, &config.from_address).await?,
    );

    let responder = Responder::new(
        ResponderSettings::from(config),
        Arc::clone(&gateway) as Arc<dyn MailGateway>,
        extractor,
    );
    let summary = responder.run().await;

    gateway.shutdown().await;
    Ok(summary)
}
