use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kpart_core::ListRequest;
use kpart_kubehub::{connect_partitioned, spawn_refresher, CachedDiscovery, MAPPER_RESET_INTERVAL};
use kube::core::{DynamicObject, WatchEvent};
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "kpartctl", version, about = "List and watch across partitioned API servers")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubeconfig path (default: inferred environment)
    #[arg(long = "kubeconfig", env = "KUBECONFIG", global = true, default_value = "")]
    kubeconfig: String,

    /// API server of one partition; repeat once per partition
    #[arg(long = "server", global = true)]
    servers: Vec<String>,

    /// Number of partitions (defaults to the number of --server flags, or 1)
    #[arg(long = "partitions", env = "KPART_PARTITIONS", global = true)]
    partitions: Option<usize>,

    /// Kubernetes namespace (default: all)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Discover served resources (incl. CRDs)
    Discover,
    /// Query server versions through a round-robin client pool
    Version {
        /// Pool size
        #[arg(long = "clients", default_value_t = 1)]
        clients: usize,
        /// Number of requests to spread over the pool
        #[arg(long = "requests", default_value_t = 1)]
        requests: usize,
    },
    /// List objects of a GVK across all partitions
    Ls {
        /// GVK key, e.g. "v1/ConfigMap" or "apps/v1/Deployment"
        gvk: String,
        /// Resource version; non-empty lists every partition and merges
        #[arg(long = "rv", default_value = "")]
        resource_version: String,
        #[arg(short = 'l', long = "selector")]
        selector: Option<String>,
        #[arg(long = "timeout")]
        timeout: Option<u32>,
    },
    /// Get one object through the preferred partition
    Get {
        gvk: String,
        name: String,
    },
    /// Watch a GVK across all partitions and print +/~/- events
    Watch {
        gvk: String,
        #[arg(long = "rv", default_value = "")]
        resource_version: String,
        #[arg(short = 'l', long = "selector")]
        selector: Option<String>,
        /// Skip partitions that do not hold the data instead of reporting them
        #[arg(long = "allow-partial", action = ArgAction::SetTrue)]
        allow_partial: bool,
    },
}

fn init_tracing() {
    let env = std::env::var("KPART_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

/// Serve Prometheus metrics when `KPART_METRICS_ADDR` is set.
fn init_metrics() {
    let Ok(addr) = std::env::var("KPART_METRICS_ADDR") else { return };
    let sock = match addr.parse::<std::net::SocketAddr>() {
        Ok(sock) => sock,
        Err(e) => {
            warn!(addr = %addr, error = %e, "ignoring KPART_METRICS_ADDR; expected host:port");
            return;
        }
    };
    if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(sock).install() {
        warn!(error = %e, "metrics exporter not installed");
        return;
    }
    info!(addr = %sock, "metrics exporter listening");
}

fn mapper_interval() -> Duration {
    std::env::var("KPART_MAPPER_RESET_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(MAPPER_RESET_INTERVAL)
}

fn request(resource_version: &str, selector: Option<&str>) -> ListRequest {
    let req = ListRequest::default().at(resource_version);
    match selector {
        Some(s) => req.labels(s),
        None => req,
    }
}

fn object_key(o: &DynamicObject) -> String {
    let name = o.metadata.name.as_deref().unwrap_or("");
    match o.metadata.namespace.as_deref() {
        Some(ns) => format!("{}/{}", ns, name),
        None => name.to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let partitions = cli.partitions.unwrap_or_else(|| cli.servers.len().max(1));
    let ns = cli.namespace.as_deref();

    match cli.command {
        Commands::Discover => {
            let mapper = CachedDiscovery::connect(&cli.kubeconfig).await?;
            let resources = mapper.resources().await?;
            match cli.output {
                Output::Human => {
                    for r in resources {
                        let scope = if r.namespaced { "namespaced" } else { "cluster" };
                        let gv = if r.group.is_empty() { r.version.clone() } else { format!("{}/{}", r.group, r.version) };
                        println!("{} • {} • {}", gv, r.kind, scope);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&resources)?),
            }
        }
        Commands::Version { clients, requests } => {
            let pool = kpart_kubehub::connect_pool(&cli.kubeconfig, clients).await?;
            for i in 0..requests {
                let info = pool.acquire().apiserver_version().await?;
                println!("{:>3} {} {}", i, info.git_version, info.platform);
            }
        }
        Commands::Ls { gvk, resource_version, selector, timeout } => {
            info!(gvk = %gvk, ns = ?ns, rv = %resource_version, partitions, "ls invoked");
            let mapper = CachedDiscovery::connect(&cli.kubeconfig).await?;
            let client = connect_partitioned(&cli.kubeconfig, partitions, &cli.servers, &gvk, ns, &mapper).await?;
            let mut req = request(&resource_version, selector.as_deref());
            req.timeout_seconds = timeout;
            let listing = client.list(&req).await?;
            match cli.output {
                Output::Human => {
                    println!("resourceVersion: {}", listing.resource_version());
                    println!("{:<40} {:<12} AGE", "NAMESPACE/NAME", "RV");
                    for item in &listing.items {
                        let rv = item.metadata.resource_version.as_deref().unwrap_or("-");
                        let age = render_age(item.metadata.creation_timestamp.as_ref());
                        println!("{:<40} {:<12} {}", object_key(item), rv, age);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&listing.items)?),
            }
        }
        Commands::Get { gvk, name } => {
            let mapper = CachedDiscovery::connect(&cli.kubeconfig).await?;
            let client = connect_partitioned(&cli.kubeconfig, partitions, &cli.servers, &gvk, ns, &mapper).await?;
            let obj = client.get(&name).await?;
            println!("{}", serde_json::to_string_pretty(&obj)?);
        }
        Commands::Watch { gvk, resource_version, selector, allow_partial } => {
            info!(gvk = %gvk, ns = ?ns, partitions, allow_partial, "watch invoked");
            let mapper = CachedDiscovery::connect(&cli.kubeconfig).await?;
            let refresher = spawn_refresher(mapper.clone(), mapper_interval())?;
            let client = connect_partitioned(&cli.kubeconfig, partitions, &cli.servers, &gvk, ns, &mapper).await?;
            let mut req = request(&resource_version, selector.as_deref());
            req.allow_partial_watch = allow_partial;
            let mut agg = client.watch(&req).await;
            if let Some(e) = agg.error() {
                warn!(error = %e, "some partitions could not be watched");
                eprintln!("warning: {}", e);
            }
            loop {
                tokio::select! {
                    next = agg.next() => match next {
                        Some(Ok(WatchEvent::Added(o))) => println!("+ {}", object_key(&o)),
                        Some(Ok(WatchEvent::Modified(o))) => println!("~ {}", object_key(&o)),
                        Some(Ok(WatchEvent::Deleted(o))) => println!("- {}", object_key(&o)),
                        Some(Ok(WatchEvent::Bookmark(_))) => {}
                        Some(Ok(WatchEvent::Error(status))) => warn!(code = status.code, message = %status.message, "watch error event"),
                        Some(Err(e)) => warn!(error = %e, "watch stream error"),
                        None => {
                            warn!("all partition streams ended");
                            break;
                        }
                    },
                    _ = signal::ctrl_c() => {
                        info!("Ctrl-C received; closing watch");
                        break;
                    }
                }
            }
            agg.close().await;
            refresher.stop();
        }
    }

    Ok(())
}

/// Compact age of an object: `3d4h`, `2h10m`, `5m`, `42s`; `-` when unknown.
fn render_age(created: Option<&Time>) -> String {
    let Some(created) = created else { return "-".to_string() };
    let now = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
    format_age(Duration::from_secs(now.saturating_sub(created.0.timestamp()).max(0) as u64))
}

fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    match (secs / 86_400, secs % 86_400 / 3600, secs % 3600 / 60) {
        (0, 0, 0) => format!("{}s", secs),
        (0, 0, m) => format!("{}m", m),
        (0, h, m) => format!("{}h{}m", h, m),
        (d, h, _) => format!("{}d{}h", d, h),
    }
}
