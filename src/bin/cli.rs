//! Command line front end for building and querying eye-analysis caches.
//!
//! Usage:
//!   blinkscan analyze <video> [--policy update] [--max-frames N] [--fallback]
//!   blinkscan stats <video> [--start N] [--end N] [--json]
//!   blinkscan segments <video> [--duration 30] [--mode width|frontal] [--json]
//!   blinkscan blinks <video> --start N --end N
//!   blinkscan locate <video>
//!   blinkscan recipe cache|fit <recipe.csv>

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use blinkscan::{
    best_fit, build_cache, count_blinks, find_continuous_frames, frames_for, BestFit,
    BlinkEvent, BlinkSummary, BuildReport, CacheEntry, CachePolicy, ContentKey, DataLayout,
    DetectorSettings, DlibLandmarker, EngineConfig, FfmpegOpener, FrameAnalyzer,
    LandmarkPredictor, LogConfig, Recipe, RunLog, RustfaceDetector, SearchMode, Segment,
    StatTriple, Statistics,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "blinkscan")]
#[command(author, version, about = "Eye-region analysis of face videos", long_about = None)]
struct Args {
    /// Data directory holding csv/, log/ and video/
    #[arg(long, env = "BLINKSCAN_DATA_DIR", default_value = "./data", global = true)]
    data_dir: PathBuf,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct ModelArgs {
    /// SeetaFace detector model
    #[arg(long, env = "BLINKSCAN_DETECTOR_MODEL", default_value = "seeta_fd_frontal_v1.0.bin")]
    detector: PathBuf,

    /// 68-point landmark model: dlib `.dat`/`.dat.bz2`, or an OpenCV LBF `.yaml`
    #[arg(
        long,
        env = "BLINKSCAN_LANDMARK_MODEL",
        default_value = "shape_predictor_68_face_landmarks.dat.bz2"
    )]
    landmarks: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze a video and write its cache
    Analyze {
        video: PathBuf,

        /// What to do with an existing cache
        #[arg(long, value_enum, default_value_t = CachePolicy::Overwrite)]
        policy: CachePolicy,

        /// Stop after this many frames
        #[arg(long)]
        max_frames: Option<u32>,

        /// Retry with the slower detector when the fast one finds nothing usable
        #[arg(long)]
        fallback: bool,

        #[command(flatten)]
        models: ModelArgs,

        /// Output the build report as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Eye metric statistics over a frame range
    Stats {
        video: PathBuf,

        /// First frame (default: first cached frame)
        #[arg(long)]
        start: Option<u32>,

        /// Last frame, inclusive (default: last cached frame)
        #[arg(long)]
        end: Option<u32>,

        #[arg(short, long)]
        json: bool,
    },

    /// Continuous segments and their best-fit clips
    Segments {
        video: PathBuf,

        /// Minimum clip length in seconds
        #[arg(short, long, default_value_t = 30.0)]
        duration: f64,

        #[arg(long, value_enum, default_value_t = SearchMode::Width)]
        mode: SearchMode,

        #[arg(short, long)]
        json: bool,
    },

    /// Count blinks over a frame range
    Blinks {
        video: PathBuf,

        #[arg(long)]
        start: u32,

        #[arg(long)]
        end: u32,

        #[arg(short, long)]
        json: bool,
    },

    /// Print the cache identity of a video
    Locate {
        video: PathBuf,

        #[arg(short, long)]
        json: bool,
    },

    /// Batch operations over a training recipe
    Recipe {
        #[command(subcommand)]
        action: RecipeCommand,
    },
}

#[derive(Subcommand, Debug)]
enum RecipeCommand {
    /// Build or extend the cache of every listed video
    Cache {
        recipe: PathBuf,

        #[arg(long)]
        max_frames: Option<u32>,

        #[arg(long)]
        fallback: bool,

        #[command(flatten)]
        models: ModelArgs,
    },

    /// Find the best clip start for every listed video
    Fit {
        recipe: PathBuf,

        #[arg(long, value_enum, default_value_t = SearchMode::Width)]
        mode: SearchMode,

        /// Write the found start times back into the recipe
        #[arg(short, long)]
        update: bool,
    },
}

fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let layout = DataLayout::new(&args.data_dir);
    if let Err(e) = layout.ensure() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let log = match RunLog::create(&LogConfig {
        level: if args.verbose { "debug" } else { "info" }.to_string(),
        log_dir: layout.log_dir.clone(),
        console: true,
    }) {
        Ok(log) => log,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let result = log.in_scope(|| {
        info!(log = %log.path().display(), "run started");
        let result = run(&args, &layout);
        if let Err(e) = &result {
            error!("{e:#}");
        }
        result
    });
    drop(log);

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args, layout: &DataLayout) -> anyhow::Result<()> {
    match &args.command {
        Command::Analyze {
            video,
            policy,
            max_frames,
            fallback,
            models,
            json,
        } => {
            let mut analyzer = build_analyzer(models)?;
            let config = EngineConfig {
                policy: *policy,
                max_frames: *max_frames,
                allow_fallback: *fallback,
            };
            let report = build_cache(&FfmpegOpener, video, layout, &mut analyzer, &config)?;
            emit(&report, *json, format_report)?;
        }

        Command::Stats {
            video,
            start,
            end,
            json,
        } => {
            let (_, entry) = load_cache(layout, video)?;
            let start = start.or(entry.first_index()).unwrap_or(1);
            let end = end.or(entry.last_index()).unwrap_or(start);

            match Statistics::compute(entry.records(), start..=end) {
                Some(stats) => emit(&stats, *json, format_stats)?,
                None => bail!("no analyzed frames between {start} and {end}"),
            }
        }

        Command::Segments {
            video,
            duration,
            mode,
            json,
        } => {
            let (_, entry) = load_cache(layout, video)?;
            let output = find_segments(&entry, *duration, *mode)?;
            emit(&output, *json, format_segments)?;
        }

        Command::Blinks {
            video,
            start,
            end,
            json,
        } => {
            let (_, entry) = load_cache(layout, video)?;
            let summary = count_blinks(entry.records(), *start..=*end);
            emit(&summary, *json, format_blinks)?;
        }

        Command::Locate { video, json } => {
            let key = ContentKey::from_file(video)?;
            let output = LocateOutput {
                video: video.display().to_string(),
                cache_exists: layout.cache_path(&key).is_file(),
                cache_path: layout.cache_path(&key),
                key,
            };
            emit(&output, *json, format_locate)?;
        }

        Command::Recipe { action } => match action {
            RecipeCommand::Cache {
                recipe,
                max_frames,
                fallback,
                models,
            } => cache_recipe(layout, recipe, *max_frames, *fallback, models)?,
            RecipeCommand::Fit {
                recipe,
                mode,
                update,
            } => fit_recipe(layout, recipe, *mode, *update)?,
        },
    }

    Ok(())
}

/// Fallback is switched per build from `EngineConfig::allow_fallback`.
fn build_analyzer(models: &ModelArgs) -> anyhow::Result<FrameAnalyzer> {
    let primary = RustfaceDetector::load(&models.detector, DetectorSettings::primary())?;
    let secondary = RustfaceDetector::load(&models.detector, DetectorSettings::secondary())?;
    let landmarks = load_landmarks(&models.landmarks)
        .with_context(|| format!("loading landmark model {}", models.landmarks.display()))?;

    Ok(FrameAnalyzer::new(Box::new(primary), landmarks).with_secondary(Box::new(secondary)))
}

fn is_lbf_model(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "yaml" || ext == "yml")
}

fn load_landmarks(path: &Path) -> anyhow::Result<Box<dyn LandmarkPredictor>> {
    if is_lbf_model(path) {
        return load_lbf(path);
    }
    Ok(Box::new(DlibLandmarker::load(path)?))
}

#[cfg(feature = "opencv")]
fn load_lbf(path: &Path) -> anyhow::Result<Box<dyn LandmarkPredictor>> {
    Ok(Box::new(blinkscan::LbfLandmarker::load(path)?))
}

#[cfg(not(feature = "opencv"))]
fn load_lbf(path: &Path) -> anyhow::Result<Box<dyn LandmarkPredictor>> {
    bail!(
        "{} is an OpenCV LBF model; rebuild with `--features opencv` or pass a dlib model",
        path.display()
    )
}

fn load_cache(layout: &DataLayout, video: &Path) -> anyhow::Result<(ContentKey, CacheEntry)> {
    let key = ContentKey::from_file(video)?;
    let path = layout.cache_path(&key);
    if !path.is_file() {
        bail!(
            "no cache for {} (expected {}); run `blinkscan analyze` first",
            video.display(),
            path.display()
        );
    }

    let entry = CacheEntry::load(&path)?;
    Ok((key, entry))
}

fn emit<T: Serialize>(value: &T, json: bool, human: fn(&T) -> String) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print!("{}", human(value));
    }
    Ok(())
}

#[derive(Serialize)]
struct SegmentsOutput {
    fps: f64,
    min_frames: u32,
    mode: SearchMode,
    segments: Vec<Segment>,
    best_fit: Vec<BestFit>,
}

fn find_segments(entry: &CacheEntry, duration: f64, mode: SearchMode) -> anyhow::Result<SegmentsOutput> {
    let fps = entry
        .estimated_fps()
        .context("cache has no usable time stamps")?;
    let min_frames = frames_for(duration, fps);
    let segments = find_continuous_frames(entry.records(), min_frames);

    let best = match (entry.first_index(), entry.last_index()) {
        (Some(first), Some(last)) => match Statistics::compute(entry.records(), first..=last) {
            Some(stats) => best_fit(
                entry.records(),
                &segments,
                &stats.max_width(),
                mode,
                min_frames,
            ),
            None => Vec::new(),
        },
        _ => Vec::new(),
    };

    Ok(SegmentsOutput {
        fps,
        min_frames,
        mode,
        segments,
        best_fit: best,
    })
}

#[derive(Serialize)]
struct LocateOutput {
    video: String,
    key: ContentKey,
    cache_path: PathBuf,
    cache_exists: bool,
}

fn cache_recipe(
    layout: &DataLayout,
    recipe_path: &Path,
    max_frames: Option<u32>,
    fallback: bool,
    models: &ModelArgs,
) -> anyhow::Result<()> {
    let recipe = Recipe::load(recipe_path)?;
    let mut analyzer = build_analyzer(models)?;
    let config = EngineConfig {
        policy: CachePolicy::Update,
        max_frames,
        allow_fallback: fallback,
    };

    let mut failed = 0;
    for entry in &recipe.entries {
        let video = entry.video_path();
        match build_cache(&FfmpegOpener, &video, layout, &mut analyzer, &config) {
            Ok(report) => info!(video = %video.display(), rows = report.rows, "cached"),
            Err(e) => {
                failed += 1;
                warn!(video = %video.display(), error = %e, "cache build failed");
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} videos failed", recipe.entries.len());
    }
    Ok(())
}

fn fit_recipe(layout: &DataLayout, recipe_path: &Path, mode: SearchMode, update: bool) -> anyhow::Result<()> {
    let mut recipe = Recipe::load(recipe_path)?;
    info!(recipe = %recipe_path.display(), update, "fitting recipe");

    for entry in &mut recipe.entries {
        let video = entry.video_path();
        let cache = load_cache(layout, &video).and_then(|(_, cache)| {
            find_segments(&cache, entry.duration, mode).map(|found| (cache, found))
        });

        let (cache, found) = match cache {
            Ok(found) => found,
            Err(e) => {
                warn!(video = %video.display(), "{e:#}");
                continue;
            }
        };

        match found.best_fit.first() {
            Some(fit) => {
                let (start, end) = fit.run.seconds(found.fps);
                println!(
                    "{}: looseness {}, start {} ({:.3}), end {} ({:.3})",
                    entry.file_name, fit.looseness, fit.run.start, start, fit.run.end, end
                );
                if update {
                    entry.set_start_frame(fit.run.start, found.fps);
                }
            }
            None => {
                println!("{}: none ({} rows cached)", entry.file_name, cache.records().len());
            }
        }
    }

    if update {
        recipe.save()?;
        info!(recipe = %recipe_path.display(), "recipe updated");
    }
    Ok(())
}

fn format_report(report: &BuildReport) -> String {
    let mut s = String::new();

    s.push_str(&format!("Cache: {}\n", report.cache_path.display()));
    s.push_str(&format!("Policy: {}\n", report.policy));
    s.push_str(&format!("Rotation: {}\n", report.rotation));
    s.push_str(&format!(
        "Video: {}x{} at {:.2} fps\n",
        report.info.width, report.info.height, report.info.fps
    ));

    s.push_str("\nStatistic:\n");
    s.push_str(&format!("  total {} frames visited\n", report.frames_visited));
    s.push_str(&format!("  {} frames analyzed\n", report.frames_analyzed));
    s.push_str(&format!("  {} frames copied from the previous cache\n", report.frames_copied));
    if report.rows_carried > 0 {
        s.push_str(&format!("  {} rows carried past the frame limit\n", report.rows_carried));
    }
    s.push_str(&format!(
        "  {} frames ({:.2}%) failed\n",
        report.frames_failed,
        report.failed_percent()
    ));
    s.push_str(&format!("  {} rows written\n", report.rows));

    s
}

fn triple_line(label: &str, t: &StatTriple) -> String {
    format!(
        "  {:<24} min {:.3}, avg {:.3}, max {:.3}\n",
        label, t.min, t.avg, t.max
    )
}

fn format_stats(stats: &Statistics) -> String {
    let mut s = String::new();

    s.push_str(&format!(
        "Frames {}..={} ({} analyzed)\n",
        stats.start, stats.end, stats.frames
    ));
    s.push_str(&triple_line("eye aspect ratio(left):", &stats.ear.left));
    s.push_str(&triple_line("eye aspect ratio(right):", &stats.ear.right));
    s.push_str(&triple_line("eye width(left):", &stats.width.left));
    s.push_str(&triple_line("eye width(right):", &stats.width.right));
    s.push_str(&triple_line("eye height(left):", &stats.inner_height.left));
    s.push_str(&triple_line("eye height(right):", &stats.inner_height.right));
    s.push_str(&triple_line("eye to mouth(left):", &stats.eye_to_mouth.left));
    s.push_str(&triple_line("eye to mouth(right):", &stats.eye_to_mouth.right));

    s
}

fn format_segments(output: &SegmentsOutput) -> String {
    let mut s = String::new();

    s.push_str(&format!(
        "Continuous frames (at least {} frames at {:.2} fps):\n",
        output.min_frames, output.fps
    ));
    if output.segments.is_empty() {
        s.push_str("  none\n");
        return s;
    }
    for segment in &output.segments {
        let (start, end) = segment.seconds(output.fps);
        s.push_str(&format!(
            "  segment: start: {} ({:.3}), end: {} ({:.3})\n",
            segment.start, start, segment.end, end
        ));
    }

    s.push_str(&format!("\nBest fit ({}):\n", output.mode));
    if output.best_fit.is_empty() {
        s.push_str("  none\n");
    }
    for fit in &output.best_fit {
        let (start, end) = fit.run.seconds(output.fps);
        s.push_str(&format!(
            "  looseness: {}, start: {} ({:.3}), end: {} ({:.3})\n",
            fit.looseness, fit.run.start, start, fit.run.end, end
        ));
    }

    s
}

fn format_blinks(summary: &BlinkSummary) -> String {
    let mut s = String::new();

    s.push_str(&format!("Frames {}..={}\n", summary.start, summary.end));
    for (index, event) in &summary.events {
        match event {
            BlinkEvent::Blink(count) => {
                s.push_str(&format!("  frame {index:>5}: blink found, count {count}\n"))
            }
            BlinkEvent::FalseBlink => s.push_str(&format!("  frame {index:>5}: false blink\n")),
            BlinkEvent::None => {}
        }
    }

    s.push_str("\nStatistic:\n");
    let total = summary.end.saturating_sub(summary.start) + 1;
    s.push_str(&format!(
        "  {} frames ({:.2}%) have no landmarks\n",
        summary.missing,
        f64::from(summary.missing) * 100.0 / f64::from(total)
    ));
    s.push_str(&format!("  {} blinks found\n", summary.blinks));
    s.push_str(&format!("  {} false blinks\n", summary.false_blinks));

    s
}

fn format_locate(output: &LocateOutput) -> String {
    let mut s = String::new();

    s.push_str(&format!("Video:  {}\n", output.video));
    s.push_str(&format!("Key:    {}-{}\n", output.key.stem, output.key.digest));
    s.push_str(&format!(
        "Cache:  {}{}\n",
        output.cache_path.display(),
        if output.cache_exists { "" } else { " (missing)" }
    ));

    s
}
