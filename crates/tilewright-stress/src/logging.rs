use std::collections::BTreeMap;
use std::future::Future;
use std::io::Write;
use std::net::{SocketAddr, UdpSocket};
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{Context, Result};
use sentry::{ClientOptions, Envelope, Transport};
use tilewright_service::config::Config as ServiceConfig;
use tilewright_service::{logging, metrics};

#[derive(Debug, Default)]
pub struct Config {
    pub backtraces: bool,
    pub sentry: bool,
    pub tracing: bool,
    pub metrics: bool,
}

#[derive(Default)]
pub struct Guard {
    sentry: Option<sentry::ClientInitGuard>,
    pub udp_sink: Option<Pin<Box<dyn Future<Output = ()> + Send>>>,
}

/// Swallows all envelopes, so the whole Sentry machinery runs without any server.
struct NoopTransport;

impl Transport for NoopTransport {
    fn send_envelope(&self, envelope: Envelope) {
        std::hint::black_box(envelope);
    }
}

/// Sets up all ambient reporting.
///
/// Every enabled flag in `config` activates that part of the reporting with a sink
/// discarding its input. Disabled parts report as configured in `service_config`.
///
/// # Safety
/// This function modifies the environment, and may only be called while the process is
/// single-threaded.
pub unsafe fn init(config: Config, service_config: &ServiceConfig) -> Result<Guard> {
    if config.backtraces {
        // SAFETY: As documented, this function may only be called in a single-threaded context.
        unsafe { std::env::set_var("RUST_BACKTRACE", "1") };
    }

    let mut guard = Guard::default();

    if config.sentry {
        let transport = |_: &ClientOptions| -> Arc<dyn Transport> { Arc::new(NoopTransport) };
        guard.sentry = Some(sentry::init((
            "https://some_token@127.0.0.1/1234",
            ClientOptions {
                release: sentry::release_name!(),
                traces_sample_rate: 1.0,
                transport: Some(Arc::new(transport)),
                ..Default::default()
            },
        )));
    } else if let Some(dsn) = &service_config.sentry_dsn {
        guard.sentry = Some(sentry::init((
            dsn.clone(),
            ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        )));
    }

    if config.tracing {
        // we want all the tracing machinery to be active, but not spam the console,
        // so redirect everything into the void:
        logging::init_json_logging("INFO,tilewright_service=DEBUG", || NoopWriter);
    } else {
        // SAFETY: Forwarded to the caller.
        unsafe { logging::init_logging(service_config) };
    }

    if config.metrics {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = UdpSocket::bind(addr).context("failed to bind metrics sink")?;
        listener.set_nonblocking(true)?;
        let socket = listener.local_addr()?;

        guard.udp_sink = Some(Box::pin(async move {
            let Ok(listener) = tokio::net::UdpSocket::from_std(listener) else {
                return;
            };
            let mut buf = Vec::with_capacity(1024);
            loop {
                buf.clear();
                if listener.recv_buf(&mut buf).await.is_err() {
                    break;
                }
            }
        }));

        let host = format!("127.0.0.1:{}", socket.port());

        // have some default tags, just to be closer to the real world config
        let mut tags = BTreeMap::new();
        tags.insert("host".into(), "stresstest".into());
        tags.insert("env".into(), "stresstest".into());

        metrics::configure_statsd("tilewright", host, tags)?;
    } else if let Some(statsd) = &service_config.metrics.statsd {
        let config = &service_config.metrics;
        metrics::configure_statsd(&config.prefix, statsd.as_str(), config.custom_tags.clone())?;
    }

    Ok(guard)
}

struct NoopWriter;
impl Write for NoopWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        // try to prevent the compiler from optimizing away all the formatting code:
        let buf = std::hint::black_box(buf);

        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
