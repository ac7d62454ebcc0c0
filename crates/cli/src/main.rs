use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use k8s_openapi::api::core::v1::Service;
use konvert_core::gateway::{Gateway, HTTPRoute};
use konvert_core::store::{object_key, raw};
use konvert_core::{KindRef, ObjectStore, StoreKind, TranslateOptions, ANNOTATION_ROUTES, LABEL_HASH_SPEC};
use konvert_store::MemoryStore;
use konvert_translate::{new_converter, Converter, RootObject};
use konvert_weights::{calculate_endpoint_weights, BackendRef};
use serde_json::Value as Json;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "konvertctl", version, about = "Translate Gateway API objects into Kong configuration")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
    Yaml,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum RootKind {
    Gateway,
    #[value(name = "httproute")]
    HttpRoute,
    Service,
}

impl RootKind {
    fn kind_ref(self) -> KindRef {
        match self {
            RootKind::Gateway => Gateway::KIND,
            RootKind::HttpRoute => HTTPRoute::KIND,
            RootKind::Service => Service::KIND,
        }
    }
}

/// Which root object to work on.
#[derive(Args, Debug)]
struct Target {
    #[arg(value_enum)]
    kind: RootKind,
    name: String,
    /// Namespace of the root object
    #[arg(long = "ns", env = "KONVERT_NAMESPACE", default_value = "default")]
    namespace: String,
}

/// Overrides on top of the `KONVERT_*` environment.
#[derive(Args, Debug)]
struct TranslateFlags {
    /// Allow cross-namespace backends without a ReferenceGrant
    #[arg(long = "no-reference-grant", action = ArgAction::SetTrue)]
    no_reference_grant: bool,
    /// Address Services by cluster DNS name instead of endpoint IPs
    #[arg(long = "fqdn", action = ArgAction::SetTrue)]
    fqdn: bool,
    #[arg(long = "cluster-domain")]
    cluster_domain: Option<String>,
    /// GatewayClass controllerName handled by this engine
    #[arg(long = "controller-name")]
    controller_name: Option<String>,
}

impl TranslateFlags {
    fn options(&self) -> TranslateOptions {
        let mut o = TranslateOptions::from_env();
        if self.no_reference_grant {
            o.reference_grant_enabled = false;
        }
        if self.fqdn {
            o.fqdn_mode = true;
        }
        if let Some(d) = &self.cluster_domain {
            o.cluster_domain = Some(d.clone());
        }
        if let Some(c) = &self.controller_name {
            o.controller_name = c.clone();
        }
        o
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Translate one root object against YAML fixtures and print the result
    Translate {
        #[command(flatten)]
        target: Target,
        /// Multi-document YAML with every object the translation reads (repeatable)
        #[arg(short = 'f', long = "file", required = true)]
        files: Vec<String>,
        #[command(flatten)]
        flags: TranslateFlags,
    },
    /// Reconcile one root object: status, upserts, duplicate and orphan cleanup
    Reconcile {
        #[command(flatten)]
        target: Target,
        /// Run against YAML fixtures instead of the cluster
        #[arg(short = 'f', long = "file")]
        files: Vec<String>,
        /// Field manager for server-side apply
        #[arg(long = "field-manager")]
        field_manager: Option<String>,
        #[command(flatten)]
        flags: TranslateFlags,
    },
    /// Compute endpoint weights for `name=weight:endpoints` backends
    Weights {
        #[arg(required = true)]
        backends: Vec<String>,
    },
}

fn init_tracing() {
    let env = std::env::var("KONVERT_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KONVERT_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KONVERT_METRICS_ADDR; expected host:port");
        }
    }
}

fn load_fixtures(files: &[String]) -> Result<MemoryStore> {
    let store = MemoryStore::new();
    for f in files {
        let text = std::fs::read_to_string(f).with_context(|| format!("reading {}", f))?;
        let n = store.seed_yaml(&text).with_context(|| format!("loading {}", f))?;
        info!(file = %f, count = n, "fixtures loaded");
    }
    Ok(store)
}

async fn load_converter(store: Arc<dyn ObjectStore>, target: &Target, options: TranslateOptions) -> Result<Box<dyn Converter>> {
    let kind = target.kind.kind_ref();
    let key = object_key(Some(&target.namespace), &target.name);
    let obj = store
        .get(&kind, Some(&target.namespace), &target.name)
        .await
        .with_context(|| format!("reading {} {}", kind.kind, key))?
        .ok_or_else(|| anyhow!("{} {} not found", kind.kind, key))?;
    let root = RootObject::from_json(obj)?.ok_or_else(|| anyhow!("{} is not a root kind", kind.kind))?;
    Ok(new_converter(root, store, options))
}

/// `name=weight:endpoints`
fn parse_backend(s: &str) -> Result<BackendRef> {
    let (name, rest) = s.split_once('=').ok_or_else(|| anyhow!("{:?}: expected name=weight:endpoints", s))?;
    let (weight, endpoints) = rest.split_once(':').ok_or_else(|| anyhow!("{:?}: expected name=weight:endpoints", s))?;
    let weight = weight.parse::<u32>().with_context(|| format!("{:?}: weight", s))?;
    let endpoints = endpoints.parse::<u32>().with_context(|| format!("{:?}: endpoints", s))?;
    Ok(BackendRef::new(name, weight, endpoints))
}

fn print_objects(output: Output, objs: &[Json]) -> Result<()> {
    match output {
        Output::Human => {
            println!("{:<18} {:<48} {:<18} ROUTES", "KIND", "NAME", "HASH");
            for o in objs {
                println!(
                    "{:<18} {:<48} {:<18} {}",
                    raw::kind(o),
                    object_key(raw::namespace(o), raw::name(o)),
                    raw::label(o, LABEL_HASH_SPEC).unwrap_or("-"),
                    raw::annotation(o, ANNOTATION_ROUTES).unwrap_or("-")
                );
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(objs)?),
        Output::Yaml => {
            for o in objs {
                print!("---\n{}", serde_yaml::to_string(o)?);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Translate { target, files, flags } => {
            let store: Arc<dyn ObjectStore> = Arc::new(load_fixtures(&files)?);
            let mut converter = load_converter(store, &target, flags.options()).await?;
            let res = converter.translate().await;
            if let Err(e) = &res {
                if e.is_fatal() {
                    bail!("translate failed: {}", e);
                }
            }
            let (objs, encoded) = converter.output_store();
            print_objects(cli.output, &objs)?;
            res?;
            encoded?;
        }
        Commands::Reconcile { target, files, field_manager, flags } => {
            let store: Arc<dyn ObjectStore> = if files.is_empty() {
                let mut kube = konvert_kubehub::KubeStore::from_env().await?;
                if let Some(m) = field_manager {
                    kube = kube.with_field_manager(m);
                }
                Arc::new(kube)
            } else {
                Arc::new(load_fixtures(&files)?)
            };
            let mut converter = load_converter(store.clone(), &target, flags.options()).await?;
            let (report, res) = konvert_apply::reconcile(converter.as_mut(), store.as_ref()).await;
            match cli.output {
                Output::Human => {
                    println!("status updated: {}", report.status_updated);
                    if report.stopped {
                        println!("stopped after status");
                    }
                    println!("translated:     {}", report.translated);
                    println!("unchanged:      {}", report.unchanged);
                    println!("kept orphans:   {}", report.kept_orphans);
                    for a in &report.applied {
                        match &a.diff {
                            Some(d) => println!("applied  {}/{} (+{} ~{} -{})", a.kind, a.name, d.adds, d.updates, d.removes),
                            None => println!("created  {}/{}", a.kind, a.name),
                        }
                    }
                    for d in &report.deleted {
                        println!("deleted  {}", d);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                Output::Yaml => print!("{}", serde_yaml::to_string(&report)?),
            }
            res?;
        }
        Commands::Weights { backends } => {
            let refs = backends.iter().map(|b| parse_backend(b)).collect::<Result<Vec<_>>>()?;
            let weights = calculate_endpoint_weights(&refs);
            match cli.output {
                Output::Human => {
                    println!("{:<24} WEIGHT", "BACKEND");
                    for (name, w) in &weights {
                        println!("{:<24} {}", name, w);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&weights)?),
                Output::Yaml => print!("{}", serde_yaml::to_string(&weights)?),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_spec_parses() {
        let b = parse_backend("blue=3:2").unwrap();
        assert_eq!((b.name.as_str(), b.weight, b.endpoints), ("blue", 3, 2));
        assert!(parse_backend("blue").is_err());
        assert!(parse_backend("blue=x:2").is_err());
    }

    #[test]
    fn cli_shape_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_defaults() {
        let f = TranslateFlags { no_reference_grant: true, fqdn: true, cluster_domain: Some("cluster.local".into()), controller_name: None };
        let o = f.options();
        assert!(!o.reference_grant_enabled);
        assert!(o.fqdn_mode);
        assert_eq!(o.cluster_domain.as_deref(), Some("cluster.local"));
    }
}
