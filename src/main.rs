mod affinity;
mod backend;
mod buffer_pool;
mod codec;
mod config;
mod event_loop;
mod http;
mod metrics;
mod notifier;
mod poll;
mod queue;
mod request_flow;
mod ring_types;
mod worker;

use std::os::unix::io::IntoRawFd;
use std::thread;

use clap::Parser;
use log::{error, info};
use socket2::{Domain, Protocol, Socket, Type};

use affinity::pin_to_core;
use backend::StubClassifier;
use buffer_pool::{BytePool, set_factory_pool};
use config::{CQ_DEPTH, MAX_CORES, PORT, SQ_DEPTH};
use event_loop::EventLoop;
use notifier::CompletionNotifier;
use queue::{build_completion_channel, build_submission_channel};
use worker::InferenceWorker;

#[derive(Parser)]
#[command(about = "Multi-core HTTP inference server")]
struct Args {
    /// Number of cores to run pipelines on (three pinned threads each)
    #[arg(short = 'n', long, default_value_t = 1)]
    cores: usize,

    /// First logical core to pin to
    #[arg(short = 'c', long, default_value_t = 0)]
    first_core: usize,
}

/// One listener per core; SO_REUSEPORT spreads accepts across them.
fn create_listener(port: u16) -> Socket {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
        .expect("failed to create socket");
    socket.set_reuse_address(true).unwrap();

    // SO_REUSEPORT via raw setsockopt (not in socket2 API)
    unsafe {
        use std::os::unix::io::AsRawFd;
        let optval: libc::c_int = 1;
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_REUSEPORT,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }

    socket.set_nonblocking(true).unwrap();

    let addr = std::net::SocketAddrV4::new(std::net::Ipv4Addr::UNSPECIFIED, port);
    socket.bind(&addr.into()).expect("failed to bind");
    socket.listen(1024).expect("failed to listen");
    socket
}

fn main() {
    env_logger::init();
    metrics::spawn_reporter();

    let args = Args::parse();
    let cores = args.cores.max(1);
    if args.first_core + cores > MAX_CORES {
        error!(
            "invalid core range {}..{} (limit {MAX_CORES})",
            args.first_core,
            args.first_core + cores
        );
        std::process::exit(1);
    }

    // Factory needs an arena for empty slices created during ring
    // initialization.
    set_factory_pool(BytePool::new_boxed(1));

    info!("infercore: {cores} core(s), port {PORT}");

    let mut handles = Vec::with_capacity(cores * 3);
    for i in 0..cores {
        let core = args.first_core + i;

        let (submission_tx, submission_rx) = build_submission_channel(SQ_DEPTH);
        let (completion_tx, completion_rx) = build_completion_channel(CQ_DEPTH);
        let (writeback_tx, writeback_rx) = build_completion_channel(CQ_DEPTH);

        let listen_fd = create_listener(PORT).into_raw_fd();

        handles.push(
            thread::Builder::new()
                .name(format!("front-{core}"))
                .spawn(move || {
                    pin_to_core(core);
                    EventLoop {
                        core,
                        listen_fd,
                        submissions: submission_tx,
                        writeback: writeback_rx,
                    }
                    .run()
                })
                .expect("failed to spawn front end"),
        );

        handles.push(
            thread::Builder::new()
                .name(format!("worker-{core}"))
                .spawn(move || {
                    pin_to_core(core);
                    InferenceWorker::new(submission_rx, completion_tx, StubClassifier::new()).run()
                })
                .expect("failed to spawn worker"),
        );

        handles.push(
            thread::Builder::new()
                .name(format!("notify-{core}"))
                .spawn(move || {
                    pin_to_core(core);
                    CompletionNotifier::new(completion_rx, writeback_tx).run()
                })
                .expect("failed to spawn notifier"),
        );
    }

    info!("infercore: ready");

    for handle in handles {
        let _ = handle.join();
    }
}
