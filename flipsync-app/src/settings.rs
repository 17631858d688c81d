//! Persistent host settings (JSON file), environment overrides, and CLI flags.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use flipsync_core::{BackendKind, EngineConfig, Waveform};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub backend: String,
    pub samples_per_second: u32,
    pub game_update_hz: u32,
    pub tone_hz: u32,
    pub tone_volume: i16,
    pub waveform: String,
    pub safety_fraction: f32,
    pub hardware_buffer_bytes: u32,
    pub samples_per_callback: u16,
    pub sleep_margin_ms: u64,
    pub debug_sync_display: bool,
    pub marker_history: usize,
    pub framebuffer_width: u32,
    pub framebuffer_height: u32,
    pub record_wav: Option<String>,
    /// Wall-clock run limit; `None` runs until Ctrl-C.
    pub run_seconds: Option<u64>,
    pub max_frames: Option<u64>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            backend: "cpal".into(),
            samples_per_second: 48_000,
            game_update_hz: 30,
            tone_hz: 256,
            tone_volume: 3000,
            waveform: "sine".into(),
            safety_fraction: 1.0 / 3.0,
            hardware_buffer_bytes: 2048,
            samples_per_callback: 1024,
            sleep_margin_ms: 1,
            debug_sync_display: false,
            marker_history: 15,
            framebuffer_width: 800,
            framebuffer_height: 600,
            record_wav: None,
            run_seconds: None,
            max_frames: None,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        let defaults = Self::default();
        self.backend = normalize_backend(&self.backend);
        self.waveform = normalize_waveform(&self.waveform);
        self.samples_per_second = self.samples_per_second.clamp(8_000, 192_000);
        self.game_update_hz = self.game_update_hz.clamp(3, 240);
        self.tone_hz = self.tone_hz.clamp(20, 20_000);
        self.tone_volume = self.tone_volume.clamp(1, i16::MAX);
        if !self.safety_fraction.is_finite() {
            self.safety_fraction = defaults.safety_fraction;
        }
        self.safety_fraction = self.safety_fraction.clamp(0.0, 1.0);
        // The hardware chunk has to fit well inside one second of audio.
        let ring_bytes = self.samples_per_second * 4;
        self.hardware_buffer_bytes =
            self.hardware_buffer_bytes.clamp(64, 65_536.min(ring_bytes / 2)) / 4 * 4;
        self.samples_per_callback = self.samples_per_callback.clamp(64, 8_192);
        self.sleep_margin_ms = self.sleep_margin_ms.min(10);
        self.marker_history = self.marker_history.clamp(1, 240);
        self.framebuffer_width = self.framebuffer_width.clamp(16, 4_096);
        self.framebuffer_height = self.framebuffer_height.clamp(16, 4_096);
        self.record_wav = self
            .record_wav
            .as_ref()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        self.run_seconds = self.run_seconds.filter(|s| *s > 0);
        self.max_frames = self.max_frames.filter(|f| *f > 0);
    }

    /// Apply `FLIPSYNC_*` overrides. `lookup` is `std::env::var` in the
    /// binary. Unparseable values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FLIPSYNC_BACKEND") {
            self.backend = v;
        }
        if let Some(v) = lookup("FLIPSYNC_WAVEFORM") {
            self.waveform = v;
        }
        if let Some(v) = lookup("FLIPSYNC_TONE_HZ").and_then(|v| v.trim().parse().ok()) {
            self.tone_hz = v;
        }
        if let Some(v) = lookup("FLIPSYNC_UPDATE_HZ").and_then(|v| v.trim().parse().ok()) {
            self.game_update_hz = v;
        }
        if let Some(v) = lookup("FLIPSYNC_SAFETY_FRACTION").and_then(|v| v.trim().parse().ok()) {
            self.safety_fraction = v;
        }
        if let Some(v) = lookup("FLIPSYNC_DEBUG_SYNC") {
            self.debug_sync_display = parse_flag(&v);
        }
        if let Some(v) = lookup("FLIPSYNC_RECORD") {
            self.record_wav = Some(v);
        }
    }

    /// CLI flags win over the file and the environment.
    pub fn apply_cli(&mut self, cli: &CliArgs) {
        if let Some(backend) = &cli.backend {
            self.backend = backend.clone();
        }
        if let Some(path) = &cli.record {
            self.record_wav = Some(path.clone());
        }
        if let Some(tone) = cli.tone {
            self.tone_hz = tone;
        }
        if cli.debug_sync {
            self.debug_sync_display = true;
        }
        if cli.seconds.is_some() {
            self.run_seconds = cli.seconds;
        }
        if cli.frames.is_some() {
            self.max_frames = cli.frames;
        }
    }

    pub fn run_limit(&self) -> Option<Duration> {
        self.run_seconds.map(Duration::from_secs)
    }

    /// Map onto the engine's configuration. Call `normalize` first.
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            samples_per_second: self.samples_per_second,
            game_update_hz: self.game_update_hz,
            tone_hz: self.tone_hz,
            tone_volume: self.tone_volume,
            waveform: match self.waveform.as_str() {
                "square" => Waveform::Square,
                _ => Waveform::Sine,
            },
            safety_fraction: self.safety_fraction,
            hardware_buffer_bytes: self.hardware_buffer_bytes,
            samples_per_callback: self.samples_per_callback,
            sleep_margin: Duration::from_millis(self.sleep_margin_ms),
            debug_sync_display: self.debug_sync_display,
            marker_history: self.marker_history,
            framebuffer_width: self.framebuffer_width,
            framebuffer_height: self.framebuffer_height,
            backend: match self.backend.as_str() {
                "simulated" => BackendKind::Simulated,
                _ => BackendKind::Cpal,
            },
            record_wav: self.record_wav.as_ref().map(PathBuf::from),
            max_frames: self.max_frames,
        }
    }
}

pub fn normalize_backend(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "sim" | "simulated" | "virtual" | "null" => "simulated".into(),
        _ => "cpal".into(),
    }
}

pub fn normalize_waveform(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "square" | "sq" => "square".into(),
        _ => "sine".into(),
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Command-line flags for the `flipsync` binary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliArgs {
    pub settings: Option<PathBuf>,
    pub seconds: Option<u64>,
    pub frames: Option<u64>,
    pub backend: Option<String>,
    pub record: Option<String>,
    pub tone: Option<u32>,
    pub debug_sync: bool,
    pub save: bool,
    pub help: bool,
}

pub const USAGE: &str = "Usage: flipsync [--settings <path>] [--seconds <n>] [--frames <n>] \
[--backend cpal|simulated] [--record <wav>] [--tone <hz>] [--debug-sync] [--save]";

impl CliArgs {
    /// Parse flags, excluding the program name.
    pub fn parse<I>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut cli = Self::default();
        let mut it = args.into_iter();
        while let Some(flag) = it.next() {
            let mut value =
                |name: &str| it.next().with_context(|| format!("missing value for {name}"));
            match flag.as_str() {
                "--settings" => cli.settings = Some(PathBuf::from(value("--settings")?)),
                "--seconds" => {
                    cli.seconds = Some(value("--seconds")?.parse().context("invalid --seconds")?)
                }
                "--frames" => {
                    cli.frames = Some(value("--frames")?.parse().context("invalid --frames")?)
                }
                "--backend" => cli.backend = Some(value("--backend")?),
                "--record" => cli.record = Some(value("--record")?),
                "--tone" => cli.tone = Some(value("--tone")?.parse().context("invalid --tone")?),
                "--debug-sync" => cli.debug_sync = true,
                "--save" => cli.save = true,
                "--help" | "-h" => cli.help = true,
                other => bail!("unknown argument: {other}"),
            }
        }
        Ok(cli)
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("flipsync")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".config")
            })
            .join("flipsync")
            .join("settings.json")
    }
}

/// Missing or malformed files fall back to defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
