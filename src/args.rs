use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "creepyvid",
    about = "Assemble narrated horror videos from images, music and subtitles"
)]
pub struct Args {
    /// Narration audio file produced by the TTS stage
    #[clap(long)]
    pub audio: PathBuf,

    /// Story title; derived from the audio filename when omitted
    #[clap(long)]
    pub title: Option<String>,

    /// Plain-text story file used for image prompts and subtitles
    #[clap(long)]
    pub story_file: Option<PathBuf>,

    #[clap(long, default_value = "assets/images")]
    pub images_dir: PathBuf,

    #[clap(long, default_value = "assets/videos")]
    pub videos_dir: PathBuf,

    #[clap(long, default_value = "assets/music/creepy-music.mp3")]
    pub music: PathBuf,

    /// Output video path; defaults to a timestamped name in --videos-dir
    #[clap(long)]
    pub out: Option<PathBuf>,

    #[clap(long, default_value = "1920x1080", value_parser = parse_resolution)]
    pub resolution: (u32, u32),

    #[clap(long, default_value_t = 24)]
    pub fps: u32,

    #[clap(long, default_value_t = 10.0)]
    pub seconds_per_image: f64,

    #[clap(long, default_value_t = 1.0)]
    pub crossfade: f64,

    #[clap(long)]
    pub subtitles: bool,

    #[clap(long, default_value_t = 8)]
    pub words_per_caption: usize,

    #[clap(long, default_value_t = 50)]
    pub max_line_chars: usize,

    #[clap(long, default_value_t = -18.0)]
    pub music_volume_db: f64,

    #[clap(long, default_value_t = 0.0)]
    pub narration_volume_db: f64,

    #[clap(long, default_value_t = 2.0)]
    pub music_fade_in: f64,

    #[clap(long, default_value_t = 2.0)]
    pub music_fade_out: f64,

    #[clap(long, default_value = "1792x1024")]
    pub image_size: String,

    #[clap(long, default_value = "standard")]
    pub image_quality: String,

    /// OpenAI API key; falls back to the OPENAI_API_KEY environment variable
    #[clap(long)]
    pub api_key: Option<String>,

    /// Timeout in seconds for each ffmpeg/ffprobe invocation
    #[clap(long, default_value_t = 600)]
    pub tool_timeout: u64,

    /// Cache entries older than this are evicted at startup; 0 disables
    #[clap(long, default_value_t = 30)]
    pub cache_max_age_days: i64,
}

fn parse_resolution(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once('x')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
    let width: u32 = w.parse().map_err(|_| format!("invalid width '{w}'"))?;
    let height: u32 = h.parse().map_err(|_| format!("invalid height '{h}'"))?;
    if width == 0 || height == 0 {
        return Err("resolution must be non-zero".into());
    }
    Ok((width, height))
}
