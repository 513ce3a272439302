use std::path::Path;

use crate::probe::AudioTrack;
use crate::strategy::{AudioPlan, Mode, VideoPlan};

pub const MASTER_PLAYLIST: &str = "main.m3u8";
const SEGMENT_TEMPLATE: &str = "stream_%v_%d.ts";
const VARIANT_TEMPLATE: &str = "stream_%v.m3u8";

/// Build the transcoder command line for one session.
///
/// Flag order is contractual: the muxer rejects a `-map` that references a
/// filter label before `-filter_complex` declares it.
pub fn build_args(
    url: &str,
    user_agent: &str,
    mode: &Mode,
    audio: &[AudioTrack],
    out_dir: &Path,
    segment_secs: u32,
) -> Vec<String> {
    let (video, audio_plan): (&VideoPlan, Option<&AudioPlan>) = match mode {
        Mode::NativeDirect => return Vec::new(),
        Mode::AudioOnly { video, audio } => (video, Some(audio)),
        Mode::VideoOnly { video } => (video, None),
        Mode::FullTranscode { video, audio } => (video, audio.as_ref()),
    };
    let tracks: &[AudioTrack] = if audio_plan.is_some() { audio } else { &[] };

    let mut args: Vec<String> = Vec::new();
    let mut push = |items: &[&str]| {
        for i in items {
            args.push((*i).to_string());
        }
    };

    // 1. global input flags
    push(&[
        "-hide_banner",
        "-y",
        "-user_agent",
        user_agent,
        "-fflags",
        "+genpts",
        "-avoid_negative_ts",
        "make_zero",
    ]);

    // 2. input
    push(&["-i", url]);

    // 3. audio filter graph, before any map that references its labels
    if !tracks.is_empty() {
        push(&["-filter_complex", &audio_filter_graph(tracks)]);
    }

    // 4. video map, 5. audio maps
    push(&["-map", "0:v:0"]);
    for t in tracks {
        push(&["-map", &format!("[outa{}]", t.ordinal)]);
    }

    // 6. video codec block
    match video {
        VideoPlan::Copy { bsf } => {
            push(&["-c:v", "copy"]);
            if let Some(bsf) = bsf {
                push(&["-bsf:v", bsf]);
            }
        }
        VideoPlan::Transcode { codec, preset, crf } => {
            push(&["-c:v", codec, "-preset", preset, "-crf", crf]);
        }
    }

    // 7. audio codec block
    if let Some(plan) = audio_plan {
        if !tracks.is_empty() {
            push(&["-c:a", plan.codec]);
            if let Some(rate) = plan.sample_rate {
                push(&["-ar", &rate.to_string()]);
            }
            push(&["-b:a", plan.bitrate, "-ac", &plan.channels.to_string()]);
        }
    }

    // 8. muxer queue sizing, then HLS options
    push(&[
        "-max_muxing_queue_size",
        "1024",
        "-f",
        "hls",
        "-hls_time",
        &segment_secs.to_string(),
        "-hls_list_size",
        "0",
        "-hls_playlist_type",
        "event",
        "-hls_allow_cache",
        "1",
        "-start_number",
        "0",
        "-master_pl_name",
        MASTER_PLAYLIST,
        "-var_stream_map",
        &var_stream_map(tracks),
        "-hls_segment_filename",
        &out_dir.join(SEGMENT_TEMPLATE).to_string_lossy(),
    ]);
    args.push(out_dir.join(VARIANT_TEMPLATE).to_string_lossy().into_owned());

    args
}

/// One video variant plus an `audio` group carrying every track.
fn var_stream_map(tracks: &[AudioTrack]) -> String {
    if tracks.is_empty() {
        return "v:0".to_string();
    }
    let mut parts = vec!["v:0,agroup:audio".to_string()];
    for t in tracks {
        parts.push(format!(
            "a:{},agroup:audio,language:{},name:{}",
            t.ordinal,
            t.language,
            safe_title(t)
        ));
    }
    parts.join(" ")
}

/// Variant names reach the playlist verbatim, so anything outside
/// `[A-Za-z0-9_]` is squashed to underscores and the edges trimmed.
fn safe_title(track: &AudioTrack) -> String {
    let raw = track.title.as_deref().unwrap_or(&track.language);
    let mapped: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    let trimmed = mapped.trim_matches('_');
    if trimmed.is_empty() {
        format!("audio_{}", track.ordinal)
    } else {
        trimmed.to_string()
    }
}

/// Per-track 5.1 dialogue-lift graph.
///
/// Each track is forced to a 5.1 layout and split into its six channels; the
/// center gets 5 kHz/+4 dB and 8 kHz/+3 dB treble lifts, front L/R get
/// 6 kHz/+4 dB, the boosted center is mixed 70/30 into front L/R and a
/// 1.5x copy replaces the original center before the channels rejoin as
/// `[outa<i>]`. Intermediate labels carry a `_<i>` suffix so graphs for
/// multiple tracks can be concatenated.
fn audio_filter_graph(tracks: &[AudioTrack]) -> String {
    let mut graph = String::new();
    for t in tracks {
        let i = t.ordinal;
        let idx = t.index;
        graph.push_str(&format!(
            "[0:{idx}]aformat=channel_layouts=5.1,channelsplit=channel_layout=5.1\
             [fl_{i}][fr_{i}][fc_{i}][lfe_{i}][bl_{i}][br_{i}];"
        ));
        graph.push_str(&format!(
            "[fc_{i}]treble=g=4:f=5000,treble=g=3:f=8000[fcboost_{i}];"
        ));
        graph.push_str(&format!("[fl_{i}]treble=g=4:f=6000[flboost_{i}];"));
        graph.push_str(&format!("[fr_{i}]treble=g=4:f=6000[frboost_{i}];"));
        graph.push_str(&format!(
            "[fcboost_{i}]asplit=3[fca_{i}][fcb_{i}][fcc_{i}];"
        ));
        graph.push_str(&format!(
            "[flboost_{i}][fca_{i}]amix=inputs=2:weights=0.7 0.3[flmix_{i}];"
        ));
        graph.push_str(&format!(
            "[frboost_{i}][fcb_{i}]amix=inputs=2:weights=0.7 0.3[frmix_{i}];"
        ));
        graph.push_str(&format!("[fcc_{i}]volume=1.5[fcmix_{i}];"));
        graph.push_str(&format!(
            "[flmix_{i}][frmix_{i}][fcmix_{i}][lfe_{i}][bl_{i}][br_{i}]\
             join=inputs=6:channel_layout=5.1[outa{i}];"
        ));
    }
    // the muxer rejects a graph with a trailing separator
    graph.trim_end_matches(';').to_string()
}
