use anyhow::{anyhow, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use relay_ranker::{
    config::{Settings, DEFAULT_CONFIG_FILE},
    logging,
    proxy::{
        report, smart_best, sorted_results, CandidateRegistry, IncrementalPersister, Probe,
        ProbeResult, ProxyParser, RelayProber, ResultFilter, RunController, RunEvent, SortKey,
        WorkingCache,
    },
    ExportReport, FinalStats,
};
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound on waiting for queued cache writes at exit
const PERSIST_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Concurrent proxy relay prober and ranker
#[derive(Parser)]
#[command(name = "relay-ranker")]
#[command(about = "Probe proxy relays in parallel and rank them by latency")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe every candidate in a file and rank the results
    Check {
        /// Input file containing candidates
        input: PathBuf,
        /// Number of concurrent workers
        #[arg(short = 'n', long)]
        workers: Option<usize>,
        /// Per-request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Skip the HTTPS fallback stage
        #[arg(long)]
        no_https: bool,
        /// Do not merge in the working cache
        #[arg(long)]
        no_cache: bool,
        /// JSON report path (defaults to a timestamped name)
        #[arg(long)]
        export: Option<PathBuf>,
        /// Working list path (defaults to a timestamped name)
        #[arg(long)]
        working: Option<PathBuf>,
        /// Sort key (ping, http, status, proxy, country)
        #[arg(long, default_value = "http")]
        sort: String,
        /// Only list active candidates
        #[arg(long)]
        active_only: bool,
        /// Only list results with an HTTP time at or below this (ms)
        #[arg(long)]
        max_http_time: Option<u64>,
        /// Only list results from this country
        #[arg(long)]
        country: Option<String>,
    },
    /// Normalize and deduplicate candidates from a file
    Parse {
        /// Input file containing candidates
        input: PathBuf,
        /// Output file for normalized candidates
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Probe a single candidate
    Probe {
        /// Candidate in any supported line format
        candidate: String,
    },
    /// Print the best known candidate from the working cache
    Best,
    /// Write the default settings file
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Check {
            input,
            workers,
            timeout,
            no_https,
            no_cache,
            export,
            working,
            sort,
            active_only,
            max_http_time,
            country,
        } => {
            let mut settings = Settings::load(&cli.config)?;
            if let Some(workers) = workers {
                settings = settings.with_max_workers(workers);
            }
            if let Some(timeout) = timeout {
                settings = settings.with_timeout(timeout);
            }
            if no_https {
                settings = settings.with_test_https(false);
            }
            let sort_key: SortKey = sort.parse()?;
            let filter = ResultFilter {
                active_only,
                max_http_time,
                country,
                ..ResultFilter::default()
            };

            let cache = WorkingCache::new(&settings.cache_file);
            cache.ensure_exists()?;

            let mut registry = CandidateRegistry::new();
            let loaded = registry.load_from_file(&input)?;
            println!("Loaded {} candidates from {:?}", loaded, input);
            if !no_cache {
                let seeded = registry.seed_from_cache(&cache)?;
                if seeded > 0 {
                    println!("Added {} candidates from {:?}", seeded, cache.path());
                }
            }

            let max_workers = settings.max_workers();
            println!(
                "Checking {} candidates with {} workers, timeout: {}s",
                registry.len(),
                max_workers,
                settings.timeout
            );
            println!();

            let client = RelayProber::shared_client(max_workers)?;
            let (persister, persist_worker) = IncrementalPersister::spawn(cache.clone());
            let prober = RelayProber::new(settings.clone(), client).with_persister(persister);
            let controller = RunController::new(prober);

            let mut handle = controller.start(registry.candidates().to_vec(), max_workers)?;

            let stop = handle.stop_handle();
            let interrupt = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("Stopping...");
                    stop.stop();
                }
            });

            while let Some(event) = handle.next_event().await {
                match event {
                    RunEvent::Result(result) => print_result(&result),
                    RunEvent::Progress { completed, total } => {
                        tracing::debug!(completed, total, "progress");
                    }
                }
            }
            let run = handle.finish().await?;
            interrupt.abort();

            // The persister worker exits once the prober's handle is gone
            drop(controller);
            if tokio::time::timeout(PERSIST_DRAIN_TIMEOUT, persist_worker).await.is_err() {
                tracing::warn!("working cache writes still pending at exit");
            }

            if run.stopped {
                println!("\nRun stopped early");
            }
            print_stats(&run.stats);

            let listed = filter.apply(&sorted_results(run.session.results(), sort_key));
            if !listed.is_empty() {
                println!("\nResults:");
                for result in &listed {
                    print_result(result);
                }
            }

            match smart_best(run.session.results(), &cache) {
                Some(best) => println!("\nBest proxy: {}", best),
                None => println!("\nNo working proxy found"),
            }

            let now = Local::now();
            let export_path = export.unwrap_or_else(|| report::default_report_name(now).into());
            ExportReport::from_run(&run).write(&export_path)?;
            println!("Saved report to {:?}", export_path);

            let working_path = working.unwrap_or_else(|| report::default_working_name(now).into());
            let written = report::save_working(run.session.results(), &working_path)?;
            println!("Saved {} working proxies to {:?}", written, working_path);

            if settings.enable_sound {
                print!("\x07");
            }
        }
        Commands::Parse { input, output } => {
            let mut registry = CandidateRegistry::new();
            registry.load_from_file(&input)?;
            let candidates = registry.candidates();

            println!("Parsed {} candidates from {:?}", candidates.len(), input);

            if let Some(output_path) = output {
                ProxyParser::save_to_file(candidates, &output_path)?;
                println!("Saved parsed candidates to {:?}", output_path);
            } else {
                for candidate in candidates {
                    println!("{}", candidate);
                }
            }
        }
        Commands::Probe { candidate } => {
            let candidate = ProxyParser::normalize(&candidate)
                .ok_or_else(|| anyhow!("Invalid candidate format: {}", candidate))?;
            let settings = Settings::load(&cli.config)?;
            let cache = WorkingCache::new(&settings.cache_file);
            cache.ensure_exists()?;

            let client = RelayProber::shared_client(1)?;
            let (persister, persist_worker) = IncrementalPersister::spawn(cache);
            let prober = RelayProber::new(settings, client).with_persister(persister);

            let result = prober.probe(&candidate).await;
            drop(prober);
            let _ = tokio::time::timeout(PERSIST_DRAIN_TIMEOUT, persist_worker).await;

            print_result(&result);
            println!("  Country: {} ({})", result.country, result.country_code);
            println!("  ISP: {}", result.isp);
            println!("  Anonymity: {}", result.anonymity);
        }
        Commands::Best => {
            let settings = Settings::load(&cli.config)?;
            let cache = WorkingCache::new(&settings.cache_file);
            match smart_best(&[], &cache) {
                Some(best) => println!("{}", best),
                None => eprintln!("No best proxy available"),
            }
        }
        Commands::InitConfig => {
            Settings::default().save(&cli.config)?;
            println!("Wrote default settings to {:?}", cli.config);
        }
    }

    Ok(())
}

fn print_result(result: &ProbeResult) {
    let mark = if result.is_active() { "✓" } else { "✗" };
    println!(
        "{} {} - {} (connect {}ms, http {}ms, {})",
        mark,
        result.candidate,
        result.status,
        result.tcp_connect_ms,
        result.http_time_ms,
        result.country
    );
}

fn print_stats(stats: &FinalStats) {
    println!(
        "\nTested {}/{}: {} active, {} failed ({:.1}% success)",
        stats.tested, stats.total, stats.active, stats.failed, stats.success_rate
    );
    if stats.active > 0 {
        println!(
            "Connect: best {}ms, avg {}ms | HTTP: best {}ms, avg {}ms",
            stats.best_connect_ms, stats.avg_connect_ms, stats.best_http_ms, stats.avg_http_ms
        );
    }
}
