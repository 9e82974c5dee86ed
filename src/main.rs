use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hybrid_kv::message::types::ReplicationMode;
use hybrid_kv::network::peers::PeerDirectory;
use hybrid_kv::network::transport::UdpTransport;
use hybrid_kv::node::runtime::Node;
use rand::Rng;
use tokio::io::AsyncBufReadExt;

struct Config {
    node_id: u32,
    port: u16,
    peers: Vec<u32>,
    mode: ReplicationMode,
    log_level: tracing::Level,
    log_file: Option<String>,
    run_demo: bool,
    run_benchmark: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: 0,
            port: 8080,
            peers: Vec::new(),
            mode: ReplicationMode::Hybrid,
            log_level: tracing::Level::INFO,
            log_file: None,
            run_demo: false,
            run_benchmark: false,
        }
    }
}

fn print_usage(program: &str) {
    eprintln!(
        "Usage: {} [OPTIONS]\n\
         Options:\n\
         \x20 --node-id ID        Node identifier (required)\n\
         \x20 --port PORT         Listen port (default: 8080)\n\
         \x20 --peers PEER_LIST   Comma-separated list of peer node IDs\n\
         \x20 --mode MODE         Replication mode: chain, quorum, hybrid (default: hybrid)\n\
         \x20 --log-level LEVEL   Log level: debug, info, warn, error (default: info)\n\
         \x20 --log-file FILE     Log file path (optional)\n\
         \x20 --demo              Run demo workload\n\
         \x20 --benchmark         Run performance benchmark\n\
         \x20 --help              Show this help message",
        program
    );
}

/// Parses the command line; `Ok(None)` means help was printed.
fn parse_args(args: &[String]) -> Result<Option<Config>, String> {
    let mut config = Config::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" => return Ok(None),
            "--node-id" => {
                let value = args.get(i + 1).ok_or("--node-id needs a value")?;
                config.node_id = value.parse().map_err(|_| format!("bad node id {:?}", value))?;
                i += 2;
            }
            "--port" => {
                let value = args.get(i + 1).ok_or("--port needs a value")?;
                config.port = value.parse().map_err(|_| format!("bad port {:?}", value))?;
                i += 2;
            }
            "--peers" => {
                let value = args.get(i + 1).ok_or("--peers needs a value")?;
                for token in value.split(',').filter(|token| !token.is_empty()) {
                    let peer = token.parse().map_err(|_| format!("bad peer id {:?}", token))?;
                    config.peers.push(peer);
                }
                i += 2;
            }
            "--mode" => {
                let value = args.get(i + 1).ok_or("--mode needs a value")?;
                config.mode = match value.as_str() {
                    "chain" => ReplicationMode::ChainOnly,
                    "quorum" => ReplicationMode::QuorumOnly,
                    "hybrid" => ReplicationMode::Hybrid,
                    other => return Err(format!("unknown mode {:?}", other)),
                };
                i += 2;
            }
            "--log-level" => {
                let value = args.get(i + 1).ok_or("--log-level needs a value")?;
                config.log_level = match value.as_str() {
                    "debug" => tracing::Level::DEBUG,
                    "info" => tracing::Level::INFO,
                    "warn" => tracing::Level::WARN,
                    "error" => tracing::Level::ERROR,
                    other => return Err(format!("unknown log level {:?}", other)),
                };
                i += 2;
            }
            "--log-file" => {
                let value = args.get(i + 1).ok_or("--log-file needs a value")?;
                config.log_file = Some(value.clone());
                i += 2;
            }
            "--demo" => {
                config.run_demo = true;
                i += 1;
            }
            "--benchmark" => {
                config.run_benchmark = true;
                i += 1;
            }
            other => return Err(format!("unknown argument {:?}", other)),
        }
    }

    if config.node_id == 0 {
        return Err("--node-id is required".to_string());
    }

    Ok(Some(config))
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    match &config.log_file {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            tracing_subscriber::fmt()
                .with_max_level(config.log_level)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_max_level(config.log_level)
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let config = match parse_args(&args) {
        Ok(Some(config)) => config,
        Ok(None) => {
            print_usage(&args[0]);
            return Ok(());
        }
        Err(reason) => {
            eprintln!("Error: {}", reason);
            print_usage(&args[0]);
            std::process::exit(1);
        }
    };

    init_logging(&config)?;
    tracing::info!("Starting hybrid replication node {}", config.node_id);

    let mut cluster_nodes = config.peers.clone();
    cluster_nodes.push(config.node_id);
    cluster_nodes.sort_unstable();
    cluster_nodes.dedup();

    let peers = Arc::new(PeerDirectory::new());
    for &peer in &config.peers {
        // Convention: peer N listens on base port + N.
        peers.add(peer, "127.0.0.1", 8080 + peer as u16);
    }

    let (inbound_tx, inbound_rx) = tokio::sync::mpsc::unbounded_channel();
    let (transport_shutdown_tx, transport_shutdown_rx) = tokio::sync::watch::channel(false);

    let transport = UdpTransport::new(config.node_id, peers.clone());
    let bind_addr: SocketAddr = format!("127.0.0.1:{}", config.port).parse()?;
    transport
        .start(bind_addr, inbound_tx, transport_shutdown_rx)
        .await?;

    let node = Node::new(
        config.node_id,
        cluster_nodes,
        transport,
        inbound_rx,
        peers,
    );
    node.clone().start();

    let dispatcher = node.dispatcher();
    dispatcher.set_read_preference(config.mode);
    dispatcher.set_write_preference(config.mode);

    tracing::info!(
        "Node {} running on port {} ({} peers, mode {})",
        config.node_id,
        config.port,
        config.peers.len(),
        config.mode
    );

    if config.run_demo {
        tokio::select! {
            _ = run_demo(&node) => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    } else if config.run_benchmark {
        tokio::select! {
            _ = run_benchmark(&node) => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    } else {
        println!(
            "Node {} is running. Type 'help' for commands.",
            config.node_id
        );
        tokio::select! {
            _ = interactive_loop(&node) => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }

    tracing::info!("Shutting down node {}", config.node_id);
    let _ = transport_shutdown_tx.send(true);
    node.stop().await;
    tracing::info!("Node {} shut down successfully", config.node_id);

    Ok(())
}

async fn interactive_loop(node: &Arc<Node>) {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    while let Ok(Some(line)) = lines.next_line().await {
        match line.trim() {
            "help" => {
                println!(
                    "Available commands:\n\
                     \x20 status    - Show system status\n\
                     \x20 metrics   - Export performance metrics\n\
                     \x20 reset     - Reset performance counters\n\
                     \x20 demo      - Run demo workload\n\
                     \x20 benchmark - Run performance benchmark\n\
                     \x20 quit      - Exit the program"
                );
            }
            "status" => print_status(node),
            "metrics" => {
                let path = std::path::Path::new("metrics_export.csv");
                match node.monitor().export_csv(path) {
                    Ok(()) => println!("Metrics exported to metrics_export.csv"),
                    Err(e) => println!("Metrics export failed: {}", e),
                }
            }
            "reset" => {
                node.monitor().reset();
                println!("Performance metrics reset");
            }
            "demo" => run_demo(node).await,
            "benchmark" => run_benchmark(node).await,
            "quit" | "exit" => break,
            "" => {}
            other => {
                println!("Unknown command: {}. Type 'help' for available commands.", other);
            }
        }
    }
}

fn print_status(node: &Arc<Node>) {
    let stats = node.monitor().current_stats();
    let metrics = node.dispatcher().current_metrics();

    println!("=== System Status ===");
    match serde_json::to_string_pretty(&stats) {
        Ok(json) => println!("{}", json),
        Err(e) => println!("Failed to render stats: {}", e),
    }
    match serde_json::to_string_pretty(&metrics) {
        Ok(json) => println!("{}", json),
        Err(e) => println!("Failed to render metrics: {}", e),
    }
    println!(
        "Hybrid efficiency: {:.3}",
        node.dispatcher().hybrid_efficiency()
    );

    let alerts = node.monitor().active_alerts();
    if !alerts.is_empty() {
        println!("Active alerts:");
        for alert in alerts {
            println!("  {}", alert);
        }
    }
}

/// Mixed 70/30 read/write workload with progress reporting.
async fn run_demo(node: &Arc<Node>) {
    println!("Starting demo workload...");

    let total_ops = 1000u64;
    let started = Instant::now();
    let mut successful = 0u64;

    for operation in 1..=total_ops {
        let (is_read, key, value) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_bool(0.7),
                format!("key_{}", rng.gen_range(1..=1000)),
                format!("value_{}", rng.gen_range(1..=10000)),
            )
        };

        let response = if is_read {
            node.read(&key).await
        } else {
            node.write(&key, &value).await
        };
        if response.success {
            successful += 1;
        }

        if operation % 100 == 0 {
            let elapsed = started.elapsed().as_secs_f64();
            println!(
                "Progress: {}/{} operations, Success rate: {:.1}%, Throughput: {:.1} ops/sec",
                operation,
                total_ops,
                successful as f64 * 100.0 / operation as f64,
                operation as f64 / elapsed.max(f64::EPSILON)
            );
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let elapsed = started.elapsed();
    let metrics = node.dispatcher().current_metrics();

    println!("\nDemo completed!");
    println!("Total operations: {}", total_ops);
    println!("Successful operations: {}", successful);
    println!(
        "Success rate: {:.1}%",
        successful as f64 * 100.0 / total_ops as f64
    );
    println!("Total time: {}ms", elapsed.as_millis());
    println!(
        "Average throughput: {:.1} ops/sec",
        total_ops as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    println!("Read/Write ratio: {:.2}", metrics.read_write_ratio);
    println!("Average latency: {:.2}ms", metrics.average_latency_ms);
    println!(
        "Hybrid efficiency: {:.3}",
        node.dispatcher().hybrid_efficiency()
    );
}

/// Concurrent benchmark against the dispatcher with a final stats block
/// and CSV export.
async fn run_benchmark(node: &Arc<Node>) {
    println!("Starting performance benchmark...");

    const WORKERS: usize = 4;
    const OPS_PER_WORKER: u64 = 250;

    let completed = Arc::new(AtomicU64::new(0));
    let started = Instant::now();

    let mut workers = Vec::new();
    for _ in 0..WORKERS {
        let node = node.clone();
        let completed = completed.clone();
        workers.push(tokio::spawn(async move {
            for _ in 0..OPS_PER_WORKER {
                let (is_read, key, value) = {
                    let mut rng = rand::thread_rng();
                    (
                        rng.gen_bool(0.7),
                        format!("bench_key_{}", rng.gen_range(1..=1000)),
                        format!("bench_value_{}", rng.gen_range(1..=10000)),
                    )
                };

                if is_read {
                    node.read(&key).await;
                } else {
                    node.write(&key, &value).await;
                }
                completed.fetch_add(1, Ordering::Relaxed);

                tokio::time::sleep(Duration::from_micros(100)).await;
            }
        }));
    }

    let target = (WORKERS as u64) * OPS_PER_WORKER;
    let progress_completed = completed.clone();
    let progress = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let done = progress_completed.load(Ordering::Relaxed);
            if done >= target {
                break;
            }
            let elapsed = started.elapsed().as_secs_f64();
            println!(
                "Benchmark progress: {}/{} operations, Throughput: {:.1} ops/sec",
                done,
                target,
                done as f64 / elapsed.max(f64::EPSILON)
            );
        }
    });

    for worker in workers {
        let _ = worker.await;
    }
    progress.abort();

    let elapsed = started.elapsed();
    let stats = node.monitor().current_stats();
    let metrics = node.dispatcher().current_metrics();

    println!("\nBenchmark completed!");
    println!("=== Performance Results ===");
    println!("Total operations: {}", completed.load(Ordering::Relaxed));
    println!("Total time: {}ms", elapsed.as_millis());
    println!("Throughput: {:.1} ops/sec", stats.throughput_ops_per_sec);
    println!("Average latency: {:.2}ms", stats.average_latency_ms);
    println!("95th percentile latency: {:.2}ms", stats.p95_latency_ms);
    println!("99th percentile latency: {:.2}ms", stats.p99_latency_ms);
    println!("Success rate: {:.1}%", stats.success_rate * 100.0);
    println!("CPU utilization: {:.1}%", stats.cpu_utilization);
    println!("Memory usage: {:.1}MB", stats.memory_usage_mb);

    println!("\n=== Protocol Performance ===");
    println!(
        "Hybrid efficiency: {:.3}",
        node.dispatcher().hybrid_efficiency()
    );
    println!(
        "Mode switching overhead: {:.3}ms",
        node.dispatcher().mode_switching_overhead_ms()
    );
    println!("Read/Write ratio: {:.2}", metrics.read_write_ratio);
    println!("Workload pattern: {:?}", metrics.pattern);

    let csv_path = std::path::Path::new("benchmark_results.csv");
    match node.monitor().export_csv(csv_path) {
        Ok(()) => println!("Detailed metrics exported to benchmark_results.csv"),
        Err(e) => println!("Metrics export failed: {}", e),
    }

    let recommendations = node.monitor().recommendations();
    if !recommendations.is_empty() {
        println!("\n=== Performance Recommendations ===");
        for recommendation in recommendations {
            println!("- {}", recommendation);
        }
    }
}
