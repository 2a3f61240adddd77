use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::pin::{pin, Pin};

use clap::Parser;
use fern::colors::Color;
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::Sleep;

use ptpkit::{Clock, ClockIdentity, DriftHandling, Port, PortAction, PortState, MAX_DATA_LEN};
use ptpkit_linux::clock::LinuxClock;
use ptpkit_linux::config::Config;
use ptpkit_linux::drift;
use ptpkit_linux::observer::LogObserver;
use ptpkit_linux::socket::{self, PtpSocket};

/// Seconds to wait before reinitializing a faulted port.
const FAULT_RETRY_SECS: u64 = 5;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[clap(long, short = 'c', default_value = "/etc/ptpkit/ptp.toml")]
    config_file: PathBuf,
}

fn setup_logger(level: log::LevelFilter) -> Result<(), fern::InitError> {
    let colors = fern::colors::ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::BrightGreen)
        .debug(Color::BrightBlue)
        .trace(Color::BrightBlack);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            use std::time::{SystemTime, UNIX_EPOCH};

            let delta = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default();

            let h = delta.as_secs() % (24 * 60 * 60) / (60 * 60);
            let m = delta.as_secs() % (60 * 60) / 60;
            let s = delta.as_secs() % 60;
            let f = delta.as_secs_f64().fract() * 1e7;

            out.finish(format_args!(
                "{}[{}][{}] {}",
                format_args!("[{h:02}:{m:02}:{s:02}.{f:07}]"),
                record.target(),
                colors.color(record.level()),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}

pin_project_lite::pin_project! {
    /// A re-armable timer that stays pending until it has been reset at
    /// least once.
    struct Timer {
        #[pin]
        timer: Sleep,
        running: bool,
    }
}

impl Timer {
    fn new() -> Self {
        Timer {
            timer: tokio::time::sleep(std::time::Duration::from_secs(0)),
            running: false,
        }
    }

    fn reset(self: Pin<&mut Self>, duration: std::time::Duration) {
        let this = self.project();
        this.timer.reset(tokio::time::Instant::now() + duration);
        *this.running = true;
    }
}

impl Future for Timer {
    type Output = ();

    fn poll(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        let this = self.project();
        if *this.running {
            let result = this.timer.poll(cx);
            if result != std::task::Poll::Pending {
                *this.running = false;
            }
            result
        } else {
            std::task::Poll::Pending
        }
    }
}

struct Timers<'a> {
    announce: Pin<&'a mut Timer>,
    sync: Pin<&'a mut Timer>,
    announce_receipt: Pin<&'a mut Timer>,
    delay_request: Pin<&'a mut Timer>,
    bmca: Pin<&'a mut Timer>,
    stats: Pin<&'a mut Timer>,
}

type DaemonPort = Port<LinuxClock, LogObserver, StdRng>;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(error) = actual_main().await {
        eprintln!("ptpkit-daemon: {error}");
        std::process::exit(1);
    }
}

async fn actual_main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = Config::from_file(&args.config_file)?;
    setup_logger(config.loglevel)?;

    info!("ptpkit-daemon {} starting", env!("CARGO_PKG_VERSION"));

    let interface_ip = socket::interface_ipv4(&config.interface)?;
    let identity = config
        .identity
        .or_else(|| socket::interface_clock_identity(&config.interface))
        .ok_or("could not derive a clock identity from the interface; set `identity`")?;
    info!("clock identity {identity}, interface {} ({interface_ip})", config.interface);

    let clock = LinuxClock;
    let mut port = build_port(&config, identity, clock.clone());
    seed_drift(&mut port, &config, &clock);

    let event_socket = PtpSocket::new_event(interface_ip)?;
    let general_socket = PtpSocket::new_general(interface_ip)?;

    run(
        port,
        config,
        args.config_file,
        identity,
        event_socket,
        general_socket,
        clock,
    )
    .await
}

fn build_port(config: &Config, identity: ClockIdentity, clock: LinuxClock) -> DaemonPort {
    let drift_file = match config.clock.drift_handling {
        ptpkit_linux::config::DriftHandlingConfig::File => Some(config.clock.drift_file.clone()),
        _ => None,
    };

    Port::new(
        &config.instance_config(identity),
        config.port_settings(),
        &config.delay_filter_options(),
        &config.sync_filter_options(),
        config.servo_options(),
        clock,
        LogObserver::new(drift_file),
        StdRng::from_entropy(),
    )
}

fn seed_drift(port: &mut DaemonPort, config: &Config, clock: &LinuxClock) {
    match DriftHandling::from(config.clock.drift_handling) {
        DriftHandling::Reset => {}
        DriftHandling::File => {
            if let Some(drift) = drift::load(&config.clock.drift_file) {
                port.seed_drift_ppb(drift);
                return;
            }
            seed_from_kernel(port, clock);
        }
        DriftHandling::Preserve => seed_from_kernel(port, clock),
    }
}

fn seed_from_kernel(port: &mut DaemonPort, clock: &LinuxClock) {
    match clock.read_frequency_ppb() {
        Ok(drift) => {
            info!("continuing from kernel frequency {drift:.3} ppb");
            port.seed_drift_ppb(drift);
        }
        Err(error) => warn!("could not read kernel frequency: {error}"),
    }
}

async fn run(
    mut port: DaemonPort,
    mut config: Config,
    config_file: PathBuf,
    identity: ClockIdentity,
    event_socket: PtpSocket,
    general_socket: PtpSocket,
    clock: LinuxClock,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let mut timers = Timers {
        announce: pin!(Timer::new()),
        sync: pin!(Timer::new()),
        announce_receipt: pin!(Timer::new()),
        delay_request: pin!(Timer::new()),
        bmca: pin!(Timer::new()),
        stats: pin!(Timer::new()),
    };

    let bmca_interval = config.port_settings().announce_interval.as_core_duration();
    let stats_interval =
        std::time::Duration::from_secs(config.port_settings().stats_interval_secs as u64);
    timers.bmca.as_mut().reset(bmca_interval);
    timers.stats.as_mut().reset(stats_interval);

    let startup = port.enable();
    handle_actions(
        &mut port,
        startup.into_iter().collect(),
        &event_socket,
        &general_socket,
        &mut timers,
        &clock,
    )
    .await;

    let mut event_buffer = [0; MAX_DATA_LEN];
    let mut general_buffer = [0; 2048];

    loop {
        let actions = tokio::select! {
            result = event_socket.recv(&mut event_buffer) => match result {
                Ok((len, _)) => {
                    let timestamp = clock.now();
                    port.handle_event_receive(&event_buffer[..len], timestamp)
                }
                Err(error) => {
                    error!("event socket receive failed: {error}");
                    port.fault()
                }
            },
            result = general_socket.recv(&mut general_buffer) => match result {
                Ok((len, _)) => port.handle_general_receive(&general_buffer[..len]),
                Err(error) => {
                    error!("general socket receive failed: {error}");
                    port.fault()
                }
            },
            () = &mut timers.announce => port.handle_announce_timer(),
            () = &mut timers.sync => port.handle_sync_timer(),
            () = &mut timers.announce_receipt => port.handle_announce_receipt_timer(),
            () = &mut timers.delay_request => port.handle_delay_request_timer(),
            () = &mut timers.bmca => {
                // Re-read the interval so a reload takes effect here too.
                timers.bmca.as_mut().reset(config.port_settings().announce_interval.as_core_duration());
                port.handle_bmca_timer()
            }
            () = &mut timers.stats => {
                let interval = config.port_settings().stats_interval_secs as u64;
                timers.stats.as_mut().reset(std::time::Duration::from_secs(interval));
                port.handle_stats_timer()
            }
            _ = sighup.recv() => {
                // Reload strictly between protocol actions so in-flight
                // measurement cycles are never torn.
                match Config::from_file(&config_file) {
                    Ok(new_config) => {
                        let actions = apply_reload(&mut port, &mut config, new_config, identity, &clock);
                        handle_actions(&mut port, actions, &event_socket, &general_socket, &mut timers, &clock).await;
                    }
                    Err(error) => error!("reload failed, keeping old configuration: {error}"),
                }
                continue;
            }
            _ = sigterm.recv() => break,
            _ = sigint.recv() => break,
        };

        handle_actions(
            &mut port,
            actions.into_iter().collect(),
            &event_socket,
            &general_socket,
            &mut timers,
            &clock,
        )
        .await;

        if port.state() == PortState::Faulty {
            // The retry policy lives here, not in the protocol core: back
            // off briefly, then reinitialize.
            warn!("port faulted, reinitializing in {FAULT_RETRY_SECS} s");
            tokio::time::sleep(std::time::Duration::from_secs(FAULT_RETRY_SECS)).await;
            port.recover();
            let actions = port.enable();
            handle_actions(
                &mut port,
                actions.into_iter().collect(),
                &event_socket,
                &general_socket,
                &mut timers,
                &clock,
            )
            .await;
        }
    }

    info!("shutting down");
    if DriftHandling::from(config.clock.drift_handling) == DriftHandling::File {
        if let Err(error) = drift::save(&config.clock.drift_file, port.drift_ppb()) {
            warn!("could not save drift file: {error}");
        }
    }

    Ok(())
}

fn apply_reload(
    port: &mut DaemonPort,
    config: &mut Config,
    new_config: Config,
    identity: ClockIdentity,
    clock: &LinuxClock,
) -> VecDeque<PortAction> {
    log::set_max_level(new_config.loglevel);

    if config.requires_restart(&new_config) {
        info!("configuration changed structurally, restarting protocol");
        let drift = port.drift_ppb();
        *port = build_port(&new_config, identity, clock.clone());
        port.seed_drift_ppb(drift);
        *config = new_config;
        port.enable().into_iter().collect()
    } else {
        info!("configuration reloaded");
        port.reconfigure_servo(new_config.servo_options());
        *config = new_config;
        VecDeque::new()
    }
}

async fn handle_actions(
    port: &mut DaemonPort,
    mut queue: VecDeque<PortAction>,
    event_socket: &PtpSocket,
    general_socket: &PtpSocket,
    timers: &mut Timers<'_>,
    clock: &LinuxClock,
) {
    while let Some(action) = queue.pop_front() {
        match action {
            PortAction::SendEvent { context, data } => match event_socket.send(&data).await {
                Ok(()) => {
                    // Software transmit timestamp, taken right after the
                    // send call returns.
                    let timestamp = clock.now();
                    queue.extend(port.handle_send_timestamp(context, timestamp));
                }
                Err(error) => {
                    error!("event socket send failed: {error}");
                    queue.extend(port.fault());
                }
            },
            PortAction::SendGeneral { data } => {
                if let Err(error) = general_socket.send(&data).await {
                    error!("general socket send failed: {error}");
                    queue.extend(port.fault());
                }
            }
            PortAction::ResetAnnounceTimer { duration } => {
                debug!("arming announce timer for {duration:?}");
                timers.announce.as_mut().reset(duration);
            }
            PortAction::ResetSyncTimer { duration } => {
                timers.sync.as_mut().reset(duration);
            }
            PortAction::ResetDelayRequestTimer { duration } => {
                timers.delay_request.as_mut().reset(duration);
            }
            PortAction::ResetAnnounceReceiptTimer { duration } => {
                timers.announce_receipt.as_mut().reset(duration);
            }
        }
    }
}
