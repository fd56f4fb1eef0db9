//! Process entry point: loads configuration, wires the backend/cache/
//! suspender/engine stack together, binds the network layer, and drives the
//! thread-pool-per-socket concurrency model described for this server.

mod cli;
mod config;
mod static_backend;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};

use dhcp_cache::Cache;
use dhcp_engine::{Engine, RequestContext};
use dhcp_net::{NetLink, TxTarget};
use dhcp_resolve::NoHooks;
use dhcp_wire::Message;

use cli::Args;
use config::Config;
use static_backend::StaticBackend;

type Backend = Cache<StaticBackend>;
type Server = Engine<Backend, NoHooks>;

struct InboundJob {
    data: Vec<u8>,
    source: SocketAddr,
    port: u16,
}

struct OutboundJob {
    data: Vec<u8>,
    target: TxTarget,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            // No logger configured yet; this is the one place we print
            // directly rather than through `log`.
            eprintln!("failed to load {}: {e}", args.config.display());
            Config::default()
        }
    };

    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, config.log_level.clone()),
    );

    if args.reload {
        warn!("--reload requires an external service manager to locate the running process; sending SIGHUP yourself has the same effect");
        return Ok(());
    }

    let backend = match &args.hosts {
        Some(path) => StaticBackend::load(path)?,
        None => {
            info!("no --hosts file given, every client will resolve as Unknown");
            StaticBackend::empty()
        }
    };

    let backend = Cache::new(backend, config.cache_config())?;
    let suspender = dhcp_suspend::Suspender::new(config.suspend_config());
    let engine = Arc::new(Engine::new(backend, NoHooks, suspender, config.engine_config()));

    let netlink = futures_lite::future::block_on(NetLink::bind(&config.bind_config()))?;
    let netlink = Arc::new(Mutex::new(netlink));

    let admission = config.admission_filter();

    let shutdown = Arc::new(AtomicBool::new(false));
    let reload = Arc::new(AtomicBool::new(false));
    register_signal_handlers(&shutdown, &reload)?;

    let pool_size = config.thread_pool_size.max(1);
    let (senders, receivers): (Vec<_>, Vec<_>) = (0..pool_size)
        .map(|_| sync_channel::<InboundJob>(256))
        .unzip();

    let (outbound_tx, outbound_rx) = sync_channel::<OutboundJob>(256);

    let mut workers = Vec::with_capacity(pool_size);
    for rx in receivers {
        let engine = Arc::clone(&engine);
        let outbound_tx = outbound_tx.clone();
        workers.push(std::thread::spawn(move || worker_loop(engine, rx, outbound_tx)));
    }
    drop(outbound_tx);

    {
        let engine = Arc::clone(&engine);
        let shutdown = Arc::clone(&shutdown);
        std::thread::spawn(move || tick_loop(engine, shutdown));
    }

    match config.proxy_port {
        Some(proxy_port) => info!(
            "dhcpd listening on {} (port {}, proxy port {proxy_port})",
            config.server_ip, config.server_port
        ),
        None => info!("dhcpd listening on {} (port {})", config.server_ip, config.server_port),
    }

    reader_loop(
        netlink,
        &admission,
        &senders,
        outbound_rx,
        &engine,
        &shutdown,
        &reload,
        config.graceful_reload,
        Duration::from_secs(config.reload_grace_period_secs),
    );

    for worker in workers {
        let _ = worker.join();
    }

    Ok(())
}

fn register_signal_handlers(shutdown: &Arc<AtomicBool>, reload: &Arc<AtomicBool>) -> anyhow::Result<()> {
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(shutdown))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(shutdown))?;
    signal_hook::flag::register(signal_hook::consts::SIGHUP, Arc::clone(reload))?;
    Ok(())
}

/// Decodes just enough of the fixed header to route the datagram to a
/// worker, hashing the client's hardware address so a given MAC is always
/// handled by the same worker (ordering within a source is preserved even
/// though workers run concurrently).
fn route_for(data: &[u8], pool_size: usize) -> usize {
    const CHADDR_OFFSET: usize = 28;

    let chaddr = data.get(CHADDR_OFFSET..CHADDR_OFFSET + 6).unwrap_or(&[]);
    let hash = chaddr.iter().fold(0u64, |acc, &b| acc.wrapping_mul(31).wrapping_add(b as u64));
    (hash as usize) % pool_size.max(1)
}

#[allow(clippy::too_many_arguments)]
fn reader_loop(
    netlink: Arc<Mutex<NetLink>>,
    admission: &dhcp_net::AdmissionFilter,
    senders: &[SyncSender<InboundJob>],
    outbound_rx: Receiver<OutboundJob>,
    engine: &Arc<Server>,
    shutdown: &Arc<AtomicBool>,
    reload: &Arc<AtomicBool>,
    graceful_reload: bool,
    reload_grace_period: Duration,
) {
    let mut buf = vec![0u8; 1500];

    while !shutdown.load(Ordering::Relaxed) {
        if reload.swap(false, Ordering::Relaxed) {
            handle_reload(engine, graceful_reload, reload_grace_period);
        }

        while let Ok(job) = outbound_rx.try_recv() {
            let mut netlink = netlink.lock().unwrap();
            if let Err(e) = futures_lite::future::block_on(netlink.send(job.target, &job.data)) {
                warn!("failed to send reply: {e}");
            }
        }

        let received = {
            let mut netlink = netlink.lock().unwrap();
            futures_lite::future::block_on(netlink.receive(&mut buf))
        };

        let (len, source, port) = match received {
            Ok(triple) => triple,
            Err(e) => {
                warn!("receive failed: {e}");
                continue;
            }
        };

        // giaddr sits right after the fixed op/htype/hlen/hops/xid/secs/
        // flags/ciaddr/yiaddr/siaddr fields, at a fixed offset.
        const GIADDR_OFFSET: usize = 24;
        let giaddr = buf
            .get(GIADDR_OFFSET..GIADDR_OFFSET + 4)
            .and_then(|s| <[u8; 4]>::try_from(s).ok())
            .map(std::net::Ipv4Addr::from)
            .unwrap_or(std::net::Ipv4Addr::UNSPECIFIED);

        if !admission.admit(source, giaddr) {
            continue;
        }

        let worker = route_for(&buf[..len], senders.len());
        let job = InboundJob { data: buf[..len].to_vec(), source, port };
        if senders[worker].try_send(job).is_err() {
            warn!("worker {worker} queue full, dropping datagram from {source}");
        }
    }

    info!("shutdown requested, draining in-flight work");
}

/// A graceful reload defers `reinitialise()` to a detached thread so the
/// reader loop keeps serving in-flight requests against the current backend
/// for `grace_period` instead of stalling while the backend reloads. A
/// non-graceful reload reinitialises inline, immediately.
fn handle_reload(engine: &Arc<Server>, graceful: bool, grace_period: Duration) {
    if graceful && !grace_period.is_zero() {
        info!("graceful reload requested, reinitialising backend in {grace_period:?}");
        let engine = Arc::clone(engine);
        std::thread::spawn(move || {
            std::thread::sleep(grace_period);
            if let Err(e) = engine.reinitialise() {
                error!("backend reinitialise failed: {e}");
            }
        });
    } else {
        info!("reload requested");
        if let Err(e) = engine.reinitialise() {
            error!("backend reinitialise failed: {e}");
        }
    }
}

fn worker_loop(engine: Arc<Server>, inbound: Receiver<InboundJob>, outbound: SyncSender<OutboundJob>) {
    while let Ok(job) = inbound.recv() {
        let request = match Message::decode(&job.data) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("dropping malformed packet from {}: {e}", job.source);
                mark_malformed_source(&engine, &job.data);
                continue;
            }
        };

        // A plain UDP socket bound to 0.0.0.0:67 doesn't surface the
        // packet's original destination address, so REBINDING (broadcast
        // to any server) can't be told apart from RENEWING (unicast to the
        // server that granted the lease) by socket plumbing alone here;
        // the client's own broadcast flag is used as the next best signal.
        let ctx = RequestContext {
            source: job.source,
            port: job.port,
            received_broadcast: request.broadcast,
        };

        match engine.handle(&request, &ctx) {
            dhcp_engine::Outcome::Send(response, target) => {
                let mut out = Vec::new();
                if let Err(e) = response.encode(&mut out) {
                    warn!("failed to encode response: {e}");
                    continue;
                }
                if outbound.try_send(OutboundJob { data: out, target }).is_err() {
                    warn!("outbound queue full, dropping reply to {:?}", job.source);
                }
            }
            dhcp_engine::Outcome::Silent => {}
        }
    }
}

/// A datagram that didn't even parse as a `Message` never reaches
/// `Engine::handle`, so the suspender has to be poked directly here using
/// the same fixed header offsets `route_for`/`reader_loop` rely on for
/// routing and admission.
fn mark_malformed_source(engine: &Arc<Server>, data: &[u8]) {
    const CHADDR_OFFSET: usize = 28;
    const GIADDR_OFFSET: usize = 24;

    let Some(chaddr) = data.get(CHADDR_OFFSET..CHADDR_OFFSET + 6) else {
        return;
    };
    let mac = dhcp_wire::MacAddr::new(chaddr.try_into().expect("slice is exactly 6 bytes"));

    let giaddr = data
        .get(GIADDR_OFFSET..GIADDR_OFFSET + 4)
        .and_then(|s| <[u8; 4]>::try_from(s).ok())
        .map(std::net::Ipv4Addr::from)
        .unwrap_or(std::net::Ipv4Addr::UNSPECIFIED);

    engine.mark_malformed(mac, giaddr);
}

fn tick_loop(engine: Arc<Server>, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_secs(1));
        engine.tick();
    }
}
