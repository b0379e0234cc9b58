use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use ml_core::DetectorVariant;
use tracing::{error, warn};

/// Extension appended to outputs of a video that failed part-way.
pub const INCOMPLETE_EXTENSION: &str = "incomplete";

/// Hyphen-joined variant labels, e.g. `hands-face-pose`.
pub fn variant_list(variants: &[DetectorVariant]) -> String {
    variants
        .iter()
        .map(|variant| variant.label())
        .collect::<Vec<_>>()
        .join("-")
}

/// The three artifacts produced for one source video.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskOutputs {
    pub video: PathBuf,
    pub thumbnail: PathBuf,
    pub table: PathBuf,
}

impl TaskOutputs {
    pub fn for_video(
        input: &Path,
        variants: &[DetectorVariant],
        video_folder: &Path,
        data_folder: &Path,
    ) -> Self {
        let stem = input
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let list = variant_list(variants);
        let video = video_folder.join(format!("{stem}_{list}_labelled.mp4"));
        let thumbnail = video.with_extension("jpg");
        let table = data_folder.join(format!("{stem}_{list}_csv.gz"));
        Self {
            video,
            thumbnail,
            table,
        }
    }

    pub fn all(&self) -> [&Path; 3] {
        [&self.video, &self.thumbnail, &self.table]
    }

    /// Rename every output that exists to `<name>.incomplete` and return the
    /// new paths.
    pub fn flag_incomplete(&self) -> Vec<PathBuf> {
        let mut flagged = Vec::new();
        for path in self.all() {
            if !path.exists() {
                continue;
            }
            let target = incomplete_path(path);
            match fs::rename(path, &target) {
                Ok(()) => {
                    warn!("flagged partial output {}", target.display());
                    flagged.push(target);
                }
                Err(err) => error!("failed to flag partial output {}: {err}", path.display()),
            }
        }
        flagged
    }
}

pub fn incomplete_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(OsString::from(format!(".{INCOMPLETE_EXTENSION}")));
    PathBuf::from(name)
}
