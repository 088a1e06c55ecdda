#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use anyhow::{bail, Context, Result};
use clap::Parser;
use exposer::{
    route::ROUTE_GROUP, Backoff, BaseConfig, ConfigMapStore, EventRecorder, ExposureApi,
    ExposureKind, IngressApi, Normalizer, Reconciler, RegistrySync, RouteApi, TemplateEngine,
    WorkQueue, Workers,
};
use futures::prelude::*;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::watcher;
use std::{path::PathBuf, sync::Arc};
use tokio::time;
use tracing::Instrument;

#[derive(Parser)]
#[command(version)]
struct Args {
    #[arg(long, env = "EXPOSER_LOG_LEVEL", default_value = "exposer=info,warn")]
    log_level: kubert::LogFilter,

    #[arg(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[command(flatten)]
    client: kubert::ClientArgs,

    #[command(flatten)]
    admin: kubert::AdminArgs,

    /// Namespace to watch for Services. All namespaces when unset.
    #[arg(long, env = "KUBERNETES_NAMESPACE")]
    namespace: Option<String>,

    #[arg(long, env = "CONFIG_FILE_PATH", default_value = "configs/config.yaml")]
    config: PathBuf,

    #[arg(long, default_value = "1")]
    workers: usize,

    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    resync_period: time::Duration,

    #[arg(long, default_value = "5")]
    max_retries: u32,

    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    write_timeout: time::Duration,

    /// The kind of object that exposes Services. `auto` uses Routes when the
    /// cluster serves them.
    #[arg(long, value_enum, default_value = "auto")]
    exposure_kind: KindArg,
}

#[derive(Copy, Clone, clap::ValueEnum)]
enum KindArg {
    Auto,
    Ingress,
    Route,
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        log_level,
        log_format,
        client,
        admin,
        namespace,
        config,
        workers,
        resync_period,
        max_retries,
        write_timeout,
        exposure_kind,
    } = Args::parse();

    let base = BaseConfig::load(&config).context("invalid configuration")?;

    let mut runtime = kubert::Runtime::builder()
        .with_log(log_level, log_format)
        .with_admin(admin)
        .with_client(client)
        .build()
        .await?;

    let client = runtime.client();
    let kind = match exposure_kind {
        KindArg::Ingress => ExposureKind::Ingress,
        KindArg::Route => ExposureKind::Route,
        KindArg::Auto => detect_kind(&client, write_timeout).await?,
    };
    let exposures: Arc<dyn ExposureApi> = match kind {
        ExposureKind::Ingress => Arc::new(IngressApi::new(client.clone(), write_timeout)),
        ExposureKind::Route => Arc::new(RouteApi::new(client.clone(), write_timeout)),
    };
    tracing::info!(%kind, domain = %base.domain, namespace = ?namespace, "exposing services");

    let registry = RegistrySync::new(Arc::new(ConfigMapStore::new(client.clone(), write_timeout)));
    let reconciler = Reconciler::new(Arc::new(base), TemplateEngine::new(), exposures, registry);

    let services = match namespace.filter(|ns| !ns.is_empty()) {
        Some(ns) => runtime
            .watch_namespaced::<Service>(ns, watcher::Config::default())
            .boxed(),
        None => runtime
            .watch_all::<Service>(watcher::Config::default())
            .boxed(),
    };

    let queue = Arc::new(WorkQueue::new(Backoff::default()));
    let handles = Workers::new(
        queue.clone(),
        Arc::new(reconciler),
        Arc::new(EventRecorder::new(client)),
        max_retries,
    )
    .spawn(workers);

    // The watch ends once shutdown is signaled. Hold the shutdown handle until
    // the queue is closed and every worker has finished its current item.
    let drain = runtime.shutdown_handle();
    tokio::spawn(async move {
        Normalizer::new(queue.clone())
            .process(services, resync_period)
            .instrument(tracing::info_span!("services"))
            .await;

        queue.shut_down();
        for handle in handles {
            if let Err(error) = handle.await {
                tracing::error!(%error, "worker failed");
            }
        }
        drop(drain);
    });

    if runtime.run().await.is_err() {
        bail!("aborted");
    }

    Ok(())
}

async fn detect_kind(client: &kube::Client, timeout: time::Duration) -> Result<ExposureKind> {
    let groups = time::timeout(timeout, client.list_api_groups())
        .await
        .context("timed out listing API groups")?
        .context("failed to list API groups")?;
    if groups.groups.iter().any(|g| g.name == ROUTE_GROUP) {
        return Ok(ExposureKind::Route);
    }
    Ok(ExposureKind::Ingress)
}

/// Parses positive durations such as `500ms`, `10s`, `5m` or `1h`. A bare
/// number is taken as seconds.
fn parse_duration(s: &str) -> Result<time::Duration> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (value, unit) = s.split_at(split);
    let value = value
        .parse::<u64>()
        .with_context(|| format!("invalid duration {s:?}"))?;
    let secs = |factor: u64| {
        value
            .checked_mul(factor)
            .map(time::Duration::from_secs)
            .with_context(|| format!("duration {s:?} is too large"))
    };
    let duration = match unit {
        "ms" => time::Duration::from_millis(value),
        "" | "s" => time::Duration::from_secs(value),
        "m" => secs(60)?,
        "h" => secs(60 * 60)?,
        _ => bail!("invalid duration unit {unit:?}"),
    };
    if duration.is_zero() {
        bail!("duration {s:?} must be greater than zero");
    }
    Ok(duration)
}
