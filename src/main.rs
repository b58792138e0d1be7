mod args;
mod audio;
mod cache;
mod compositor;
mod error;
mod ffmpeg;
mod imagegen;
mod images;
mod mixer;
mod render;
mod subtitle;

use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Local;
use clap::Parser;
use regex::Regex;
use tracing::{error, info, warn};

use args::Args;
use cache::ImageCache;
use compositor::VideoFormat;
use error::RenderError;
use ffmpeg::FfmpegTool;
use imagegen::ImageBackend;
use images::{ImageGuarantor, StoryTheme};
use mixer::AudioMixSpec;
use render::{RenderChain, RenderRequest};
use subtitle::CaptionSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info") // set to "debug" for more logs
        .init();
    dotenvy::dotenv().ok();

    let args = Args::parse();

    if !args.audio.exists() {
        error!("Narration audio not found: {}", args.audio.display());
        std::process::exit(1);
    }

    let tool = FfmpegTool::locate(Duration::from_secs(args.tool_timeout))?;
    match tool.version().await {
        Ok(version) => info!("ffmpeg available: {version}"),
        Err(e) => warn!("could not check ffmpeg version: {e}"),
    }

    let title = args
        .title
        .clone()
        .unwrap_or_else(|| title_from_audio_filename(&args.audio));
    let content = match &args.story_file {
        Some(path) => std::fs::read_to_string(path)?,
        None => String::new(),
    };
    info!("Starting video assembly for: {title}");

    let narration_duration = audio::narration_duration_seconds(&tool, &args.audio).await?;
    info!("Narration duration: {narration_duration:.2} seconds");

    std::fs::create_dir_all(&args.images_dir)?;
    std::fs::create_dir_all(&args.videos_dir)?;

    let cache = ImageCache::open(&args.images_dir);
    if args.cache_max_age_days > 0 {
        let removed = cache.evict_older_than(args.cache_max_age_days);
        if removed > 0 {
            info!("Evicted {removed} stale image cache entries");
        }
    }

    let api_key = args
        .api_key
        .clone()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok());
    let backend = ImageBackend::from_api_key(api_key)?;

    let required = std::cmp::max(
        3,
        (narration_duration / args.seconds_per_image) as usize,
    );
    info!(
        "Need {required} images ({:.0}s per image)",
        args.seconds_per_image
    );

    let guarantor = ImageGuarantor::new(
        args.images_dir.clone(),
        &cache,
        &backend,
        args.image_size.clone(),
        args.image_quality.clone(),
    );
    let theme = StoryTheme {
        title: title.clone(),
        content: content.clone(),
    };
    let image_paths = guarantor.ensure_images(&theme, required).await?;
    if image_paths.is_empty() {
        return Err(RenderError::NoImages.into());
    }
    info!(
        "Using {} images, {:.2}s each",
        image_paths.len(),
        narration_duration / image_paths.len() as f64
    );
    let slots = images::allocate_slots(&image_paths, narration_duration);

    let output = args.out.clone().unwrap_or_else(|| {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        args.videos_dir
            .join(format!("creepypasta_{}_{stamp}.mp4", safe_filename(&title)))
    });

    let mut subtitle_path = None;
    if args.subtitles {
        if content.is_empty() {
            warn!("Subtitles requested but no story content available");
        } else {
            let settings = CaptionSettings {
                words_per_caption: args.words_per_caption,
                max_line_chars: args.max_line_chars,
            };
            let segments = subtitle::time_captions(&content, narration_duration, &settings);
            if segments.is_empty() {
                warn!("No caption segments produced");
            } else {
                let path = output.with_extension("srt");
                subtitle::write_srt(&path, &segments)?;
                info!("Wrote {} captions to {}", segments.len(), path.display());
                subtitle_path = Some(path);
            }
        }
    }

    let mix = AudioMixSpec::resolve(
        args.audio.clone(),
        args.music.clone(),
        args.music_volume_db,
        args.narration_volume_db,
        args.music_fade_in,
        args.music_fade_out,
    );

    let (width, height) = args.resolution;
    let request = RenderRequest {
        slots,
        mix,
        narration_duration,
        format: VideoFormat {
            width,
            height,
            fps: args.fps,
        },
        crossfade: args.crossfade,
        subtitles: subtitle_path,
        output,
    };

    let chain = RenderChain::new(&tool);
    let cancel = chain.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Cancellation requested, stopping after the current attempt");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let final_path = chain.render(&request).await?;
    info!("Final video written to {}", final_path.display());
    Ok(())
}

fn title_from_audio_filename(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown story");
    let mut name = stem;
    for prefix in ["creepypasta_", "creepypasta-", "story_", "story-"] {
        if let Some(rest) = name.strip_prefix(prefix) {
            name = rest;
            break;
        }
    }
    let timestamp = Regex::new(r"_\d{8}_\d{6}$").unwrap();
    let name = timestamp.replace(name, "");
    let title = name.replace('_', " ").trim().to_string();
    if title.is_empty() {
        stem.to_string()
    } else {
        title
    }
}

fn safe_filename(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    cleaned.trim().replace(' ', "_").chars().take(50).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn title_strips_prefix_and_timestamp() {
        let path = PathBuf::from("assets/output/creepypasta_The_Old_Mirror_20260312_143000.mp3");
        assert_eq!(title_from_audio_filename(&path), "The Old Mirror");
    }

    #[test]
    fn title_without_decoration_passes_through() {
        let path = PathBuf::from("whispers_in_the_attic.wav");
        assert_eq!(title_from_audio_filename(&path), "whispers in the attic");
    }

    #[test]
    fn safe_filename_drops_special_characters() {
        assert_eq!(safe_filename("The \"Thing\" on: Elm St!"), "The_Thing_on_Elm_St");
    }

    #[test]
    fn safe_filename_is_bounded() {
        let long = "a".repeat(200);
        assert_eq!(safe_filename(&long).len(), 50);
    }
}
