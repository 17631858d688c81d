//! Offline audio/video sync simulation.
//!
//! Runs the real estimator, ring, and scheduler against a virtual clock. A
//! virtual sound card drains one callback chunk whenever virtual time passes
//! its next callback deadline, and each frame's work time is drawn from a
//! seeded jitter distribution. Prints a JSON summary.
//!
//! ```text
//! cargo run -p flipsync-core --bin sync_sim -- --frames 600 --jitter-ms 6 --seed 42
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;

use flipsync_core::{
    audio::{AudioDevice, AudioSpec, BYTES_PER_SAMPLE},
    timing::{FrameScheduler, ManualClock},
    AudioEngine, EngineConfig, FrameAudio, RingBuffer,
};

#[derive(Debug)]
struct Args {
    frames: u64,
    seed: u64,
    jitter_ms: f64,
    spike_chance: f64,
    update_hz: u32,
    hardware_buffer_bytes: u32,
    safety_fraction: f32,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            frames: 300,
            seed: 7,
            jitter_ms: 4.0,
            spike_chance: 0.02,
            update_hz: 30,
            hardware_buffer_bytes: 2048,
            safety_fraction: 1.0 / 3.0,
        }
    }
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(flag) = it.next() {
        let mut value = |name: &str| it.next().with_context(|| format!("missing value for {name}"));
        match flag.as_str() {
            "--frames" => args.frames = value("--frames")?.parse().context("invalid --frames")?,
            "--seed" => args.seed = value("--seed")?.parse().context("invalid --seed")?,
            "--jitter-ms" => {
                args.jitter_ms = value("--jitter-ms")?.parse().context("invalid --jitter-ms")?
            }
            "--spike-chance" => {
                args.spike_chance = value("--spike-chance")?
                    .parse()
                    .context("invalid --spike-chance")?
            }
            "--update-hz" => {
                args.update_hz = value("--update-hz")?.parse().context("invalid --update-hz")?
            }
            "--hardware-bytes" => {
                args.hardware_buffer_bytes = value("--hardware-bytes")?
                    .parse()
                    .context("invalid --hardware-bytes")?
            }
            "--safety-fraction" => {
                args.safety_fraction = value("--safety-fraction")?
                    .parse()
                    .context("invalid --safety-fraction")?
            }
            "--help" | "-h" => {
                println!(
                    "Usage: sync_sim [--frames <n>] [--seed <n>] [--jitter-ms <ms>] \
                     [--spike-chance <p>] [--update-hz <hz>] [--hardware-bytes <n>] \
                     [--safety-fraction <f>]"
                );
                std::process::exit(0);
            }
            other => bail!("unknown argument: {other}"),
        }
    }
    if !(0.0..=1.0).contains(&args.spike_chance) {
        bail!("--spike-chance must be within [0, 1]");
    }
    if args.jitter_ms < 0.0 || !args.jitter_ms.is_finite() {
        bail!("--jitter-ms must be a non-negative number");
    }
    Ok(args)
}

/// Device whose callbacks are issued by [`VirtualHardware`].
struct VirtualDevice {
    obtained: AudioSpec,
    playing: bool,
}

impl AudioDevice for VirtualDevice {
    fn obtained(&self) -> AudioSpec {
        self.obtained
    }

    fn resume(&mut self) -> flipsync_core::error::Result<()> {
        self.playing = true;
        Ok(())
    }

    fn pause(&mut self) -> flipsync_core::error::Result<()> {
        self.playing = false;
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}

struct VirtualHardware {
    ring: Arc<RingBuffer>,
    chunk: Vec<u8>,
    period: Duration,
    next_callback: Duration,
}

impl VirtualHardware {
    /// Serve every callback due by virtual time `now`.
    fn catch_up(&mut self, now: Duration) {
        while self.next_callback <= now {
            self.ring.serve(&mut self.chunk);
            self.next_callback += self.period;
        }
    }
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary {
    seed: u64,
    frames: u64,
    fills: u64,
    starved_frames: u64,
    latent_frames: u64,
    missed_deadlines: u64,
    samples_written: u64,
    callbacks_served: u64,
    min_lead_bytes: i64,
    max_lead_bytes: i64,
    mean_lead_bytes: f64,
    simulated_seconds: f64,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("sync_sim failed: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args = parse_args()?;
    let config = EngineConfig {
        game_update_hz: args.update_hz,
        hardware_buffer_bytes: args.hardware_buffer_bytes,
        safety_fraction: args.safety_fraction,
        ..EngineConfig::default()
    };

    let mut audio = AudioEngine::open_with(&config, |spec, _ring| {
        Ok(Box::new(VirtualDevice {
            obtained: *spec,
            playing: false,
        }) as Box<dyn AudioDevice>)
    })?;

    let spec = *audio.spec();
    let clock = ManualClock::new();
    let target = config.target_frame_duration();
    let mut scheduler = FrameScheduler::new(clock.clone(), target, config.sleep_margin);
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut hardware = VirtualHardware {
        ring: Arc::clone(audio.ring()),
        chunk: vec![0u8; usize::from(spec.samples_per_callback) * BYTES_PER_SAMPLE as usize],
        period: Duration::from_secs_f64(
            f64::from(spec.samples_per_callback) / f64::from(spec.samples_per_second),
        ),
        next_callback: clock.elapsed(),
    };

    audio.start();

    let mut summary = Summary {
        seed: args.seed,
        min_lead_bytes: i64::MAX,
        max_lead_bytes: i64::MIN,
        ..Summary::default()
    };
    let mut lead_total = 0f64;

    for _ in 0..args.frames {
        scheduler.begin_frame();

        let mut work = Duration::from_secs_f64(rng.gen_range(0.0..=args.jitter_ms) / 1000.0);
        if rng.gen_bool(args.spike_chance) {
            work += target.mul_f64(1.2);
        }
        clock.advance(work / 2);
        hardware.catch_up(clock.elapsed());

        let until_flip = audio.expected_bytes_until_flip(scheduler.since_flip(), target);
        match audio.fill_frame(until_flip, |buffer| buffer.write_tone()) {
            FrameAudio::Filled(plan) => {
                summary.fills += 1;
                summary.samples_written += u64::from(plan.request.total_samples());
                if plan.audio_card_is_latent {
                    summary.latent_frames += 1;
                }
            }
            FrameAudio::Starved(_) => summary.starved_frames += 1,
            FrameAudio::Disabled => bail!("virtual device was rejected"),
        }

        clock.advance(work - work / 2);
        hardware.catch_up(clock.elapsed());

        let report = scheduler.finish_frame();
        hardware.catch_up(clock.elapsed());
        scheduler.record_flip();
        if report.missed_deadline {
            summary.missed_deadlines += 1;
        }

        let cursors = audio.cursors();
        let produced = audio.running_sample_index() * u64::from(BYTES_PER_SAMPLE);
        let lead = produced as i64 - cursors.bytes_played as i64;
        summary.min_lead_bytes = summary.min_lead_bytes.min(lead);
        summary.max_lead_bytes = summary.max_lead_bytes.max(lead);
        lead_total += lead as f64;
        summary.frames += 1;
    }

    summary.callbacks_served = audio.cursors().callbacks_served;
    summary.simulated_seconds = clock.elapsed().as_secs_f64();
    if summary.frames > 0 {
        summary.mean_lead_bytes = lead_total / summary.frames as f64;
    } else {
        summary.min_lead_bytes = 0;
        summary.max_lead_bytes = 0;
    }

    audio.shutdown();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
