use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use cadence_adapt::{Mutator, SelfHealer};
use cadence_bus::JobBus;
use cadence_core::config::CadenceConfig;
use cadence_events::EventProcessor;
use cadence_llm::{AnthropicModel, KeywordModel, LanguageModel, ResilientModel};
use cadence_memory::{ConversationMemory, EmotionalAnalyzer};
use cadence_scheduler::SchedulerEngine;
use cadence_store::Store;
use cadence_umbrella::{SlotLedger, UmbrellaCoordinator, UmbrellaResolver};
use cadence_workers::providers::{EmailProvider, SmsProvider, VoiceProvider};
use cadence_workers::{EmailWorker, HealingWorker, SmsWorker, VoiceWorker};

mod app;
mod http;
mod shutdown;

/// Pool size shared by the sms/email channel workers and the event
/// processors (voice parallelism comes from config).
const WORKER_POOL_SIZE: usize = 5;

#[derive(Parser)]
#[command(name = "cadence-gateway", about = "Cadence outbound sequencer")]
struct Args {
    /// Path to cadence.toml (default: ~/.cadence/cadence.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadence_gateway=info,cadence_scheduler=info,tower_http=debug".into()),
        )
        .init();

    let args = Args::parse();
    let config = CadenceConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        CadenceConfig::default()
    });

    // Durable store and coordination store.
    let store = Arc::new(Store::open(&config.database.path)?);
    let bus = JobBus::connect(&config.coordination.redis_url, &config.coordination.namespace).await?;
    let coordinator =
        UmbrellaCoordinator::connect(&config.coordination.redis_url, &config.coordination.namespace)
            .await?;
    let resolver = Arc::new(UmbrellaResolver::new(
        store.clone(),
        Duration::from_secs(config.voice.resolver_ttl_secs),
    ));
    let ledger = Arc::new(SlotLedger::new());

    // Language model: configured provider with the keyword fallback behind
    // it; bare fallback when no provider is configured.
    let primary: Option<Arc<dyn LanguageModel>> = config.providers.llm.as_ref().map(|llm| {
        Arc::new(AnthropicModel::new(
            llm.api_key.clone(),
            llm.base_url.clone(),
            llm.model.clone(),
            Duration::from_secs(llm.timeout_secs),
        )) as Arc<dyn LanguageModel>
    });
    let model: Arc<dyn LanguageModel> = Arc::new(ResilientModel::new(
        primary,
        Arc::new(KeywordModel::new()),
    ));

    let memory = Arc::new(ConversationMemory::new(store.clone()));
    let analyzer = Arc::new(EmotionalAnalyzer::new(model.clone()));
    let mutator = Mutator::new(model.clone(), config.mutation.min_confidence);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut workers = Vec::new();

    // Scheduler loop.
    let engine = SchedulerEngine::new(
        store.clone(),
        bus.clone(),
        memory.clone(),
        mutator,
        config.scheduler.poll_interval_ms,
        config.scheduler.batch_size,
    );
    workers.push(tokio::spawn(engine.run(shutdown_rx.clone())));

    // Voice workers (slot-gated).
    if let Some(voice_cfg) = &config.providers.voice {
        let provider = Arc::new(VoiceProvider::new(
            voice_cfg.base_url.clone(),
            voice_cfg.callback_url.clone(),
            Duration::from_secs(voice_cfg.timeout_secs),
        ));
        for worker_id in 0..config.voice.concurrency {
            let worker = VoiceWorker::new(
                store.clone(),
                bus.clone(),
                resolver.clone(),
                coordinator.clone(),
                ledger.clone(),
                provider.clone(),
                config.voice.retry_delay_ms,
                config.voice.max_retries,
            );
            workers.push(tokio::spawn(worker.run(worker_id, shutdown_rx.clone())));
        }
    } else {
        info!("voice provider not configured, voice queue will not drain");
    }

    // SMS workers.
    if let Some(sms_cfg) = &config.providers.sms {
        let provider = Arc::new(SmsProvider::new(
            sms_cfg.base_url.clone(),
            sms_cfg.api_key.clone(),
            sms_cfg.from_number.clone(),
            Duration::from_secs(sms_cfg.timeout_secs),
        ));
        for worker_id in 0..WORKER_POOL_SIZE {
            let worker = SmsWorker::new(store.clone(), bus.clone(), provider.clone());
            workers.push(tokio::spawn(worker.run(worker_id, shutdown_rx.clone())));
        }
    } else {
        info!("sms provider not configured, sms queue will not drain");
    }

    // Email workers.
    if let Some(email_cfg) = &config.providers.email {
        let provider = Arc::new(EmailProvider::new(
            email_cfg.base_url.clone(),
            email_cfg.api_key.clone(),
            email_cfg.from_address.clone(),
            Duration::from_secs(email_cfg.timeout_secs),
        ));
        for worker_id in 0..WORKER_POOL_SIZE {
            let worker = EmailWorker::new(store.clone(), bus.clone(), provider.clone());
            workers.push(tokio::spawn(worker.run(worker_id, shutdown_rx.clone())));
        }
    } else {
        info!("email provider not configured, email queue will not drain");
    }

    // Healing worker.
    let healing = HealingWorker::new(store.clone(), bus.clone(), SelfHealer::new(store.clone()));
    workers.push(tokio::spawn(healing.run(shutdown_rx.clone())));

    // Event-processor pool.
    let processor = EventProcessor::new(
        store.clone(),
        bus.clone(),
        coordinator.clone(),
        ledger.clone(),
        analyzer,
        memory.clone(),
    );
    for worker_id in 0..WORKER_POOL_SIZE {
        workers.push(tokio::spawn(
            processor.clone().run(worker_id, shutdown_rx.clone()),
        ));
    }

    // Webhook surface.
    let state = Arc::new(app::AppState::new(
        config.clone(),
        store,
        bus,
        coordinator.clone(),
        resolver,
        ledger.clone(),
    ));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    info!(%addr, "cadence gateway listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, router).with_graceful_shutdown(shutdown::wait_for_signal());
    server.await?;

    // Signal received: drain workers and release held slots.
    shutdown::drain(
        shutdown_tx,
        workers,
        ledger,
        coordinator,
        Duration::from_secs(config.shutdown.drain_deadline_secs),
    )
    .await;

    Ok(())
}
