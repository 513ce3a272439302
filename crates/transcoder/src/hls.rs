use std::path::Path;

/// Content-Type for HLS master/variant playlists.
pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Content-Type for MPEG-TS segments.
pub const SEGMENT_CONTENT_TYPE_TS: &str = "video/MP2T";

/// Seconds held back from the encoded duration so clients never seek into a
/// segment that is declared but not yet fully written.
pub const LIVE_EDGE_MARGIN_SECS: f64 = 8.0;

/// Sum of all `#EXTINF:<d>,` directives in a playlist.
pub fn encoded_duration(playlist: &str) -> f64 {
    playlist
        .lines()
        .filter_map(|line| line.strip_prefix("#EXTINF:"))
        .filter_map(|rest| rest.split(',').next())
        .filter_map(|d| d.trim().parse::<f64>().ok())
        .sum()
}

/// Encoded duration for a session directory.
///
/// The master playlist is consulted first; when the muxer writes a
/// variant-only master (no `#EXTINF` lines), the first variant playlist
/// carries the segment durations instead.
pub async fn encoded_duration_in_dir(dir: &Path) -> f64 {
    let Ok(master) = tokio::fs::read_to_string(dir.join(crate::args::MASTER_PLAYLIST)).await else {
        return 0.0;
    };
    let total = encoded_duration(&master);
    if total > 0.0 {
        return total;
    }
    match tokio::fs::read_to_string(dir.join("stream_0.m3u8")).await {
        Ok(variant) => encoded_duration(&variant),
        Err(_) => 0.0,
    }
}

/// Latest position a client may seek to without outrunning the encoder.
pub fn live_edge(encoded_duration: f64) -> f64 {
    (encoded_duration - LIVE_EDGE_MARGIN_SECS).max(0.0)
}
