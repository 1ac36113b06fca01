use std::path::{Path, PathBuf};

use covermatch::config::{EvalConfig, FRAME_RATE};
use covermatch::npy;
use ndarray::Array2;

/// One recording of a fixture corpus.
pub struct FixtureRecording {
    pub key: &'static str,
    pub song: &'static str,
    pub duration_s: f64,
    /// Constant feature frame repeated over the whole recording.
    pub frame: [f32; 3],
}

pub const fn rec(
    key: &'static str,
    song: &'static str,
    duration_s: f64,
    frame: [f32; 3],
) -> FixtureRecording {
    FixtureRecording {
        key,
        song,
        duration_s,
        frame,
    }
}

/// 2 s windows, 25 model frames pooled from 50 raw frames.
pub fn config() -> EvalConfig {
    let mut config = EvalConfig::new(2.0, 25, 2);
    config.workers = Some(2);
    config
}

/// Write feature files and a JSON-lines manifest for `recordings`.
pub fn write_corpus(dir: &Path, manifest_name: &str, recordings: &[FixtureRecording]) -> PathBuf {
    let features_dir = dir.join("features");
    std::fs::create_dir_all(&features_dir).expect("create features dir");
    let mut lines = Vec::new();
    for recording in recordings {
        let frames = (recording.duration_s * FRAME_RATE as f64).ceil() as usize;
        let features = Array2::from_shape_fn((frames, 3), |(_, bin)| recording.frame[bin]);
        let feat = features_dir.join(format!("{}.npy", recording.key));
        npy::write_matrix(&feat, features.view()).expect("write features");
        lines.push(
            serde_json::json!({
                "rec": recording.key,
                "song_id": recording.song,
                "dur_s": recording.duration_s,
                "feat": feat.to_string_lossy(),
            })
            .to_string(),
        );
    }
    let path = dir.join(manifest_name);
    std::fs::write(&path, lines.join("\n") + "\n").expect("write manifest");
    path
}

pub fn write_exclusions(dir: &Path, pairs: &[(usize, usize)]) -> PathBuf {
    let path = dir.join("query_in_ref.json");
    let line = serde_json::json!({ "query_in_ref": pairs }).to_string();
    std::fs::write(&path, line + "\n").expect("write exclusions");
    path
}
