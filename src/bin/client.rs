use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Instant;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(about = "Test client for the infercore inference server")]
struct Args {
    /// Server port
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Send a few requests and verify results (default)
    Smoke,
    /// Send sequential keep-alive requests on one connection and verify
    Pipeline {
        /// Requests to send
        #[arg(short, long, default_value_t = 1000)]
        requests: usize,
    },
    /// Benchmark throughput with concurrent keep-alive connections
    Bench {
        /// Number of concurrent connections
        #[arg(short, long, default_value_t = 4)]
        connections: usize,
        /// Requests per connection
        #[arg(short, long, default_value_t = 10_000)]
        requests: usize,
    },
}

fn build_request(model: &str, payload: &[u8], keep_alive: bool) -> Vec<u8> {
    let image = STANDARD.encode(payload);
    let body = format!(r#"{{"model_name":"{model}","image_data":"{image}"}}"#);
    let connection = if keep_alive { "Keep-Alive" } else { "Close" };
    format!(
        "POST /infer HTTP/1.1\r\n\
         Host: localhost\r\n\
         Connection: {connection}\r\n\
         Content-Length: {}\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

/// Read one HTTP response; returns (status line, body).
fn read_response(stream: &mut TcpStream) -> (String, Vec<u8>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).expect("failed to read response");
        assert!(n > 0, "connection closed mid-response");
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let status = head.lines().next().unwrap_or("").to_string();
    let content_length: usize = head
        .lines()
        .find_map(|l| {
            let (k, v) = l.split_once(':')?;
            k.trim()
                .eq_ignore_ascii_case("content-length")
                .then(|| v.trim().parse().ok())?
        })
        .expect("response without Content-Length");

    let mut body = buf[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).expect("failed to read body");
        assert!(n > 0, "connection closed mid-body");
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);
    (status, body)
}

fn one_round(stream: &mut TcpStream, model: &str, payload: &[u8], keep_alive: bool) -> serde_json::Value {
    let request = build_request(model, payload, keep_alive);
    stream.write_all(&request).expect("failed to send request");
    let (status, body) = read_response(stream);
    assert!(
        status.contains("200"),
        "unexpected status line: {status}"
    );
    serde_json::from_slice(&body).expect("response body is not JSON")
}

fn smoke_test(addr: &str) {
    let mut stream = TcpStream::connect(addr).expect("connect failed");
    let result = one_round(&mut stream, "resnet50", b"ten bytes!", false);
    assert!(
        result.get("error").is_none(),
        "resnet50 request failed: {result}"
    );
    println!("smoke: resnet50 ok: {result}");

    let mut stream = TcpStream::connect(addr).expect("connect failed");
    let result = one_round(&mut stream, "not_a_model", b"ten bytes!", false);
    assert!(
        result.get("error").is_some(),
        "unknown model should produce an error body, got: {result}"
    );
    println!("smoke: unknown model answered with error body: {result}");

    // Empty payload exercises the fallback fixture path.
    let mut stream = TcpStream::connect(addr).expect("connect failed");
    let result = one_round(&mut stream, "resnet18", b"", false);
    assert!(result.get("error").is_none(), "fixture request failed");
    println!("smoke: empty payload (fixture) ok");

    println!("smoke: PASS");
}

fn pipeline_test(addr: &str, requests: usize) {
    let mut stream = TcpStream::connect(addr).expect("connect failed");
    for i in 0..requests {
        let payload = [(i % 256) as u8; 32];
        let keep_alive = i + 1 < requests;
        let result = one_round(&mut stream, "resnet50", &payload, keep_alive);
        assert!(
            result.get("error").is_none(),
            "request {i} failed: {result}"
        );
    }
    println!("pipeline: {requests} keep-alive requests PASS");
}

fn bench_test(addr: &str, connections: usize, requests: usize) {
    let start = Instant::now();
    let handles: Vec<_> = (0..connections)
        .map(|_| {
            let addr = addr.to_string();
            std::thread::spawn(move || {
                let mut stream = TcpStream::connect(&addr).expect("connect failed");
                stream.set_nodelay(true).ok();
                for i in 0..requests {
                    let payload = [(i % 256) as u8; 32];
                    let keep_alive = i + 1 < requests;
                    let result = one_round(&mut stream, "resnet50", &payload, keep_alive);
                    assert!(result.get("error").is_none());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("bench connection panicked");
    }

    let elapsed = start.elapsed();
    let total = (connections * requests) as f64;
    println!(
        "bench: {total:.0} requests over {connections} connections in {elapsed:?}  ({:.0} req/s)",
        total / elapsed.as_secs_f64()
    );
}

fn main() {
    let args = Args::parse();
    let addr = format!("127.0.0.1:{}", args.port);

    match args.command.unwrap_or(Command::Smoke) {
        Command::Smoke => smoke_test(&addr),
        Command::Pipeline { requests } => pipeline_test(&addr, requests),
        Command::Bench {
            connections,
            requests,
        } => bench_test(&addr, connections, requests),
    }
}
