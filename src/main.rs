use std::str::FromStr;

use clap::Parser;
use ingress_registrar::{common::IngressFlavor, start, Configuration};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    Layer, Registry,
};

#[derive(Parser, Debug)]
#[command(version, about = "Registers tagged services as routes on a shared ingress", long_about = None)]
struct CommandArgs {
    /// Name of the shared ingress.
    #[arg(long, env = "INGRESS_NAME", default_value = "auto-register-ingress")]
    ingress_name: String,

    /// Ingress implementation the annotations target: nginx or traefik.
    #[arg(long, env = "INGRESS_TYPE", default_value = "traefik")]
    ingress_type: String,

    /// Fold the namespace into route paths so identically named applications
    /// in different namespaces do not collide.
    #[arg(long, env = "NAMESPACED_INGRESS_PATH", default_value_t = false, action = clap::ArgAction::Set)]
    namespaced_ingress_path: bool,

    /// Name of a pre-existing basic-auth secret; enables the auth middleware
    /// or annotations.
    #[arg(long, env = "AUTHENTICATION_SECRET")]
    authentication_secret: Option<String>,

    /// Label whose presence opts a service into registration.
    #[arg(long, env = "SERVICE_MARKER_LABEL", default_value = "app-register")]
    marker_label: String,

    /// Service selector key the application name is read from.
    #[arg(long, env = "APP_NAME_SELECTOR", default_value = "app-name")]
    app_name_selector: String,

    /// Watch a single namespace instead of the whole cluster.
    #[arg(long, env = "WATCH_NAMESPACE")]
    watch_namespace: Option<String>,
}

fn init_tracing_logging() -> WorkerGuard {
    let file_appender = tracing_appender::rolling::never(".", "ingress-registrar.log");
    let (non_blocking_appender, guard) = tracing_appender::non_blocking(file_appender);
    let file_filter = tracing_subscriber::EnvFilter::new(std::env::var("RUST_FILE_LOG").unwrap_or_else(|_| "debug".to_owned()));
    let console_filter = tracing_subscriber::EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_owned()));

    let console_layer = fmt::layer()
        .event_format(fmt::format().compact())
        .with_target(true)
        .with_span_events(FmtSpan::NONE)
        .with_ansi(false)
        .with_filter(filter::filter_fn(|meta| !meta.is_span()))
        .with_filter(console_filter);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_appender)
        .with_span_events(FmtSpan::NONE)
        .with_target(true)
        .with_ansi(false)
        .with_filter(filter::filter_fn(|meta| !meta.is_span()))
        .with_filter(file_filter);

    Registry::default().with(console_layer).with(file_layer).init();
    guard
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ingress_registrar::Result<()> {
    let args = CommandArgs::parse();
    let _guard = init_tracing_logging();

    let ingress_flavor = IngressFlavor::from_str(&args.ingress_type)?;
    let configuration = Configuration::builder()
        .ingress_name(args.ingress_name)
        .ingress_flavor(ingress_flavor)
        .namespaced_path(args.namespaced_ingress_path)
        .credential_ref(args.authentication_secret)
        .marker_label(args.marker_label)
        .app_name_selector(args.app_name_selector)
        .watch_namespace(args.watch_namespace)
        .build();
    configuration.validate()?;

    start(configuration).await
}
