//! Measurement harness for the two GPU transfer strategies.
//!
//! Build with `--features cuda`; requires a CUDA device.

use clap::Parser;

use infercore::gpu::{self, TransferReport};

#[derive(Parser)]
#[command(about = "GPU host-buffer transfer latency measurement")]
struct Args {
    /// Transfer method: 0 = staged copy, 1 = pinned zero-copy, 2 = both
    #[arg(short, long, default_value_t = 2)]
    method: u32,

    /// Buffer size in bytes
    #[arg(short, long, default_value_t = 4 * 1024 * 1024)]
    size: usize,

    /// Iterations per measurement
    #[arg(short, long, default_value_t = 100)]
    iterations: u32,
}

fn report(name: &str, r: &TransferReport) {
    println!(
        "[{name}] size: {} bytes, iterations: {}, avg latency: {:.6} s",
        r.bytes,
        r.iterations,
        r.avg_latency.as_secs_f64()
    );
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if args.method == 0 || args.method == 2 {
        match gpu::measure_staged_copy(args.size, args.iterations) {
            Ok(r) => report("staged copy", &r),
            Err(e) => {
                eprintln!("staged copy measurement failed: {e}");
                std::process::exit(1);
            }
        }
    }

    if args.method == 1 || args.method == 2 {
        match gpu::measure_zero_copy(args.size, args.iterations) {
            Ok(r) => report("pinned zero-copy", &r),
            Err(e) => {
                eprintln!("zero-copy measurement failed: {e}");
                std::process::exit(1);
            }
        }
    }
}
