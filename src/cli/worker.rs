//! `graphwarden worker <type>`: run one worker until interrupted.

use std::sync::Arc;

use console::style;
use tokio_util::sync::CancellationToken;
use tracing::info;

use graphwarden::classifier::HttpClassifier;
use graphwarden::gate::ThresholdGate;
use graphwarden::models::WorkerType;
use graphwarden::platform::HttpPlatformClient;
use graphwarden::status::StatusReporter;
use graphwarden::worker::{
    FriendCrawl, GroupCrawl, Maintenance, Pacing, QueueConsumer, Services, Worker,
    WorkerStrategy,
};

use super::context::AppContext;

pub async fn cmd_worker(ctx: &AppContext, worker_type: WorkerType) -> anyhow::Result<()> {
    let config = &ctx.config;
    let repository = ctx.repository();
    let services = Services {
        repository: repository.clone(),
        platform: Arc::new(HttpPlatformClient::new(&config.platform)?),
        classifier: Arc::new(HttpClassifier::new(config.classifier.clone())?),
        cache: ctx.cache(),
    };
    let reporter = Arc::new(StatusReporter::new(
        ctx.store.clone(),
        ctx.keys.clone(),
        worker_type,
        config.status.interval(),
    ));
    let pacing = Pacing::for_worker(worker_type, &config.worker);
    let gate = ThresholdGate::new(repository, reporter.clone(), &config.gate);

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            signal_token.cancel();
        }
    });

    println!(
        "{} Starting {} worker {} (Ctrl-C to stop)",
        style("→").cyan(),
        style(worker_type.as_str()).bold(),
        style(reporter.worker_id().await).dim()
    );

    let workers = &config.worker;
    match worker_type {
        WorkerType::Friend => {
            let strategy =
                FriendCrawl::new(workers.batch_size, workers.seed_batch_size, workers.max_retries);
            run(strategy, services, reporter, pacing, Some(gate), cancel).await
        }
        WorkerType::Group => {
            let strategy =
                GroupCrawl::new(workers.batch_size, workers.seed_batch_size, workers.max_retries);
            run(strategy, services, reporter, pacing, Some(gate), cancel).await
        }
        WorkerType::Queue => {
            let strategy = QueueConsumer::new(Arc::new(ctx.queue()), workers.batch_size);
            run(strategy, services, reporter, pacing, None, cancel).await
        }
        WorkerType::Maintenance => {
            let strategy = Maintenance::new(workers.maintenance_batch_size);
            run(strategy, services, reporter, pacing, None, cancel).await
        }
    }

    println!("{} Worker stopped", style("✓").green());
    Ok(())
}

async fn run<S: WorkerStrategy>(
    strategy: S,
    services: Services,
    reporter: Arc<StatusReporter>,
    pacing: Pacing,
    gate: Option<ThresholdGate>,
    cancel: CancellationToken,
) {
    let mut worker = Worker::new(strategy, services, reporter, pacing);
    if let Some(gate) = gate {
        worker = worker.with_gate(gate);
    }
    worker.run(cancel).await;
}
