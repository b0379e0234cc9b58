use std::path::Path;

use tracing::warn;

/// Sentinel stored when a field cannot be recovered from the file name.
pub const NOT_PARSED: &str = "not parsed";

/// Per-video columns appended to every table row: where the recording came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Provenance {
    pub task: String,
    pub date: String,
    pub subject: String,
    /// Source file name including its extension.
    pub video: String,
}

impl Provenance {
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self::from_filename(&name)
    }

    /// Parse `date_subject_task_...ext`. With fewer than three underscore
    /// fields the date and task fall back to [`NOT_PARSED`] and the subject
    /// to the whole file name.
    pub fn from_filename(name: &str) -> Self {
        let fields: Vec<&str> = name.split('_').collect();
        if let [date, subject, task, ..] = fields.as_slice() {
            return Self {
                task: task.to_uppercase(),
                date: (*date).to_string(),
                subject: subject.to_uppercase(),
                video: name.to_string(),
            };
        }

        warn!("file name {name:?} does not follow date_subject_task; using {NOT_PARSED:?}");
        Self {
            task: NOT_PARSED.to_string(),
            date: NOT_PARSED.to_string(),
            subject: name.to_string(),
            video: name.to_string(),
        }
    }

    pub fn is_parsed(&self) -> bool {
        self.date != NOT_PARSED
    }
}
