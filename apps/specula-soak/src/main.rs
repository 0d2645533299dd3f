//! Specula soak driver
//!
//! Runs a probe cache against the recording mock backend for many frames
//! with a moving window of visible probes, then reports cache statistics.

use std::path::PathBuf;

use anyhow::Context;
use specula_core::{
    CacheFormat, ProbeSource, RealtimeTarget, TextureDimension, TextureFormat, TextureHandle,
    TextureId,
};
use specula_probe::{ProbeCacheConfig, ProbeFilterCache};
use specula_test::{baked_cubemap, MockDevice, MockFilter, MockRecorder};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_FRAMES: u32 = 600;
const DEFAULT_PROBES: usize = 96;
const DEFAULT_VISIBLE: usize = 40;
const DEFAULT_REALTIME: usize = 2;
const REPORT_INTERVAL: u32 = 120;

struct SoakArgs {
    frames: u32,
    probes: usize,
    visible: usize,
    realtime: usize,
    config: ProbeCacheConfig,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = parse_args()?;
    info!(
        "Specula soak: {} frames, {} baked probes ({} visible), {} realtime targets",
        args.frames, args.probes, args.visible, args.realtime
    );
    run(&args)
}

fn parse_args() -> anyhow::Result<SoakArgs> {
    let args: Vec<String> = std::env::args().collect();
    let mut soak = SoakArgs {
        frames: DEFAULT_FRAMES,
        probes: DEFAULT_PROBES,
        visible: DEFAULT_VISIBLE,
        realtime: DEFAULT_REALTIME,
        config: ProbeCacheConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match args[i].as_str() {
            "--frames" => soak.frames = parse_value(value, "--frames")?,
            "--probes" => soak.probes = parse_value(value, "--probes")?,
            "--visible" => soak.visible = parse_value(value, "--visible")?,
            "--realtime" => soak.realtime = parse_value(value, "--realtime")?,
            "--capacity" => soak.config.capacity = parse_value(value, "--capacity")?,
            "--probe-size" => soak.config.probe_size = parse_value(value, "--probe-size")?,
            "--config" => {
                let path = PathBuf::from(value.context("--config needs a path")?);
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?;
                soak.config = serde_json::from_str(&text)
                    .with_context(|| format!("parsing {}", path.display()))?;
            }
            "--bc6h" => {
                soak.config.format = CacheFormat::Bc6hUfloat;
                i += 1;
                continue;
            }
            "--help" | "-h" => {
                println!("Specula soak driver");
                println!();
                println!("Usage: specula-soak [OPTIONS]");
                println!();
                println!("Options:");
                println!("      --frames <N>      Frames to simulate (default: {DEFAULT_FRAMES})");
                println!("      --probes <N>      Baked probes in the scene (default: {DEFAULT_PROBES})");
                println!("      --visible <N>     Baked probes fetched per frame (default: {DEFAULT_VISIBLE})");
                println!("      --realtime <N>    Realtime cube targets (default: {DEFAULT_REALTIME})");
                println!("      --capacity <N>    Cache slices");
                println!("      --probe-size <N>  Face edge length in pixels");
                println!("      --bc6h            Store slices block compressed");
                println!("      --config <PATH>   Load the cache configuration from JSON");
                println!("  -h, --help            Show this help message");
                std::process::exit(0);
            }
            other => {
                warn!("Ignoring unknown argument {other}");
                i += 1;
                continue;
            }
        }
        i += 2;
    }

    Ok(soak)
}

fn parse_value<T: std::str::FromStr>(value: Option<&String>, flag: &str) -> anyhow::Result<T> {
    value
        .with_context(|| format!("{flag} needs a value"))?
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid value for {flag}"))
}

/// Baked probes in a mix of matching, oversized and 8-bit sources.
fn scene_probes(count: usize, probe_size: u32) -> Vec<ProbeSource> {
    (1..=count as u64)
        .map(|id| match id % 8 {
            6 => baked_cubemap(id, probe_size * 2, TextureFormat::Rgba16Float),
            7 => baked_cubemap(id, probe_size, TextureFormat::Rgba8Unorm),
            _ => baked_cubemap(id, probe_size, TextureFormat::Rgba16Float),
        })
        .collect()
}

fn realtime_targets(count: usize, first_id: u64, size: u32) -> Vec<RealtimeTarget> {
    (first_id..first_id + count as u64)
        .map(|id| RealtimeTarget {
            id: TextureId(id),
            texture: TextureHandle(id),
            dimension: TextureDimension::Cube,
            size,
            mip_levels: 1,
            format: TextureFormat::Rgba16Float,
            update_count: 0,
        })
        .collect()
}

fn run(args: &SoakArgs) -> anyhow::Result<()> {
    let mut cache = ProbeFilterCache::create(MockDevice::new(), MockFilter::new(), args.config)?;
    let probes = scene_probes(args.probes, args.config.probe_size);
    let mut realtime = realtime_targets(
        args.realtime,
        args.probes as u64 + 1,
        args.config.probe_size,
    );

    let mut recorder = MockRecorder::new();
    let mut skipped = 0u64;
    let visible = args.visible.min(probes.len());

    for frame in 0..args.frames {
        cache.new_frame()?;

        // Slide the visible window a few probes every frame
        let start = (frame as usize * 3) % probes.len().max(1);
        for probe in probes.iter().cycle().skip(start).take(visible) {
            if cache.fetch_slice_index(&mut recorder, probe) < 0 {
                skipped += 1;
            }
        }
        for target in &mut realtime {
            target.update_count += 1;
            if cache.fetch_slice_index(&mut recorder, &ProbeSource::RealtimeTarget(*target)) < 0 {
                skipped += 1;
            }
        }

        debug!(
            "Frame {frame}: {} bakes, {} commands recorded",
            cache.stats().frame_bakes,
            recorder.commands.len()
        );
        recorder.take();

        if (frame + 1) % REPORT_INTERVAL == 0 {
            let stats = cache.stats();
            info!(
                "Frame {}: hit rate {:.1}%, {} bakes, {} evictions",
                frame + 1,
                stats.hit_rate() * 100.0,
                stats.bakes,
                stats.evictions
            );
        }
    }

    let stats = *cache.stats();
    cache.release();
    let device = cache.device();
    info!("Fetches: {} ({} hits, {:.1}%)", stats.fetches, stats.hits, stats.hit_rate() * 100.0);
    info!(
        "Bakes: {} ({} conversions, {} direct copies)",
        stats.bakes, stats.conversions, stats.direct_copies
    );
    info!("Evictions: {}, skipped fetches: {skipped}", stats.evictions);
    info!(
        "Backing store: ~{:.1} MiB, textures created: {}, leaked: {}",
        cache.approx_size_bytes() as f64 / (1024.0 * 1024.0),
        device.textures_created,
        device.textures.len()
    );
    if device.double_releases > 0 {
        warn!("{} double releases detected", device.double_releases);
    }

    Ok(())
}
