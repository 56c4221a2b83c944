//! FFmpeg argument lists for every invocation the washer makes.
//!
//! Each builder returns the args without the program name. All of them start with
//! `-y -nostdin` and end with the output path, one filter per concern.

fn push_pair(args: &mut Vec<String>, flag: &str, value: impl Into<String>) {
    args.push(flag.to_string());
    args.push(value.into());
}

fn base_args(input_path: &str) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-nostdin".to_string(),
        "-i".to_string(),
        input_path.to_string(),
    ]
}

/// `-vf <filter>` with audio stream-copied.
pub fn build_video_filter_args(input_path: &str, output_path: &str, filter: &str) -> Vec<String> {
    log::debug!(
        target: "reels_washer::ffmpeg::builder",
        "video filter: {} ({} -> {})",
        filter,
        input_path,
        output_path
    );
    let mut args = base_args(input_path);
    push_pair(&mut args, "-vf", filter);
    push_pair(&mut args, "-c:a", "copy");
    args.push(output_path.to_string());
    args
}

/// Frame rate with three decimals, as used by `fps=` and `-r`.
pub fn frame_rate_arg(fps: f64) -> String {
    format!("{:.3}", fps)
}

pub fn build_fps_args(input_path: &str, output_path: &str, fps: f64) -> Vec<String> {
    let mut args = base_args(input_path);
    push_pair(&mut args, "-filter:v", format!("fps={}", frame_rate_arg(fps)));
    push_pair(&mut args, "-c:a", "copy");
    args.push(output_path.to_string());
    args
}

/// Keep `[0, duration)` with both streams copied.
pub fn build_clip_args(input_path: &str, output_path: &str, duration: f64) -> Vec<String> {
    let mut args = base_args(input_path);
    push_pair(&mut args, "-ss", "0");
    push_pair(&mut args, "-t", format!("{:.3}", duration));
    push_pair(&mut args, "-c", "copy");
    args.push(output_path.to_string());
    args
}

/// Pitch shift, tempo change and a three-band equalizer in one `-af` chain.
pub fn audio_fingerprint_filter(
    pitch_percent: f64,
    tempo_percent: f64,
    low_db: f64,
    mid_db: f64,
    high_db: f64,
) -> String {
    let sample_rate = (48000.0 * (1.0 + pitch_percent / 100.0)) as i64;
    let tempo = 1.0 + tempo_percent / 100.0;
    format!(
        "asetrate={sample_rate},aresample=48000,atempo={tempo:.6},\
         equalizer=f=200:width_type=h:width=100:g={low_db:.2},\
         equalizer=f=1000:width_type=h:width=200:g={mid_db:.2},\
         equalizer=f=8000:width_type=h:width=1000:g={high_db:.2}"
    )
}

pub fn build_audio_filter_args(input_path: &str, output_path: &str, filter: &str) -> Vec<String> {
    let mut args = base_args(input_path);
    push_pair(&mut args, "-af", filter);
    push_pair(&mut args, "-c:v", "copy");
    args.push(output_path.to_string());
    args
}

/// Decode to numbered PNG stills: `[-ss start] -i input [-t len] -vsync 0 pattern`.
pub fn build_extract_args(
    input_path: &str,
    start: Option<f64>,
    duration: Option<f64>,
    output_pattern: &str,
) -> Vec<String> {
    let mut args = vec!["-y".to_string(), "-nostdin".to_string()];
    if let Some(start) = start.filter(|s| *s > 0.0) {
        push_pair(&mut args, "-ss", format!("{:.3}", start));
    }
    push_pair(&mut args, "-i", input_path);
    if let Some(duration) = duration.filter(|d| *d > 0.0) {
        push_pair(&mut args, "-t", format!("{:.3}", duration));
    }
    push_pair(&mut args, "-vsync", "0");
    args.push(output_pattern.to_string());
    args
}

/// Encode a concat-demuxer list into MP4 with the given metadata tags.
pub fn build_concat_args(
    list_path: &str,
    codec: &str,
    bitrate_kbps: u32,
    fps: f64,
    tags: &[(String, String)],
    output_path: &str,
) -> Vec<String> {
    log::debug!(
        target: "reels_washer::ffmpeg::builder",
        "concat encode: codec={}, bitrate={}k, fps={:.3}, output={}",
        codec,
        bitrate_kbps,
        fps,
        output_path
    );
    let mut args = vec!["-y".to_string(), "-nostdin".to_string()];
    push_pair(&mut args, "-f", "concat");
    push_pair(&mut args, "-safe", "0");
    push_pair(&mut args, "-i", list_path);
    push_pair(&mut args, "-c:v", codec);
    push_pair(&mut args, "-b:v", format!("{}k", bitrate_kbps));
    push_pair(&mut args, "-pix_fmt", "yuv420p");
    push_pair(&mut args, "-r", frame_rate_arg(fps));
    push_metadata(&mut args, tags);
    push_pair(&mut args, "-movflags", "+faststart");
    args.push(output_path.to_string());
    args
}

/// Stream-copy remux that only rewrites container tags.
pub fn build_metadata_remux_args(
    input_path: &str,
    output_path: &str,
    tags: &[(String, String)],
) -> Vec<String> {
    let mut args = base_args(input_path);
    push_pair(&mut args, "-c", "copy");
    push_metadata(&mut args, tags);
    args.push(output_path.to_string());
    args
}

fn push_metadata(args: &mut Vec<String>, tags: &[(String, String)]) {
    for (key, value) in tags {
        push_pair(args, "-metadata", format!("{}={}", key, value));
    }
}

/// Args as a single shell-like line for logs. Values with spaces are quoted.
pub fn format_args_for_display(args: &[String]) -> String {
    args.iter()
        .map(|a| {
            if a.contains(' ') {
                format!("\"{}\"", a)
            } else {
                a.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
