use carbonwatch::clock::TokioClock;
use carbonwatch::config::{Configuration, FallbackModelConfig};
use carbonwatch::controller::{AuditOptions, audit};
use carbonwatch::energy::EnergyReader;
use carbonwatch::host_cpu::HostCpuReader;
use carbonwatch::logging::setup_logging;
use carbonwatch::probe::Probe;
use carbonwatch::process_cpu::ProcessCpuReader;
use carbonwatch::reader::TokioReader;
use carbonwatch::scheduler::{CancellationToken, OverrunPolicy};

/// Thin entry point wiring one audit run end to end. Argument parsing,
/// `--help` text, and spawning/killing a child process are the named
/// external-collaborator surface (spec §1 Non-goals); this binary reads its
/// target PID and audit duration from the environment instead.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let configuration = Configuration::load().unwrap_or_default();
    let _guard = setup_logging(&configuration.log)?;

    tracing::info!("Starting carbonwatch audit");

    let pid: i64 = std::env::var("PID")
        .map_err(|_| "PID environment variable is required")?
        .parse()?;
    let duration_seconds: f64 = std::env::var("DURATION_SECONDS")
        .unwrap_or_else(|_| "60".to_owned())
        .parse()?;
    let emission_factor_g_per_kwh: f64 = std::env::var("EMISSION_FACTOR_G_PER_KWH")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(475.0);

    let reader = TokioReader::new();
    let probe = Probe::new(reader.clone()).probe().await;
    if !probe.is_ok() {
        tracing::warn!(?probe.status, "RAPL packages unavailable, falling back to empirical model");
    }

    let fallback = FallbackModelConfig {
        p_idle_w: std::env::var("FALLBACK_P_IDLE_W").ok().and_then(|s| s.parse().ok()),
        p_max_w: std::env::var("FALLBACK_P_MAX_W").ok().and_then(|s| s.parse().ok()),
        tdp_w: std::env::var("FALLBACK_TDP_W").ok().and_then(|s| s.parse().ok()),
        idle_fraction: None,
        max_fraction: None,
    }
    .to_fallback_config();

    let energy = EnergyReader::new(&probe, fallback, reader.clone());
    let host_cpu = HostCpuReader::new(reader.clone());
    let process_cpu = ProcessCpuReader::new(reader, pid)?;
    let clock = TokioClock::new();

    let options = AuditOptions {
        pid,
        duration_seconds,
        tick_ms: 1_000,
        emission_factor_g_per_kwh,
        overrun_policy: OverrunPolicy::Coalesce,
        include_meta: std::env::var("INCLUDE_META").is_ok(),
        cancellation: CancellationToken::new(),
    };

    let report = audit(options, &energy, &host_cpu, &process_cpu, clock).await?;

    println!("{}", serde_json::to_string(&report)?);
    tracing::info!("Audit complete");

    Ok(())
}
