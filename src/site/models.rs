//! Typed records embedded in a course page

use crate::error::SiteError;
use serde::{Deserialize, Serialize};

/// Audio file attached to an episode
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AudioInfo {
    /// Storage key, used to build the audio URL
    pub key: String,
    /// Original file name, usually `<part><course>.mp3`
    #[serde(default)]
    pub name: String,
    /// Length in seconds
    #[serde(default)]
    pub duration: f64,
    /// Serial number
    #[serde(default)]
    pub sn: Option<u64>,
}

/// A downloadable attachment such as a lesson PDF
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    /// Storage key, used to build the file URL
    #[serde(default)]
    pub key: Option<String>,
    /// Display name including extension
    #[serde(default)]
    pub name: Option<String>,
    /// Record id, fallback when no key is present (string or number)
    #[serde(default, rename = "_id")]
    pub id: Option<serde_json::Value>,
}

impl Attachment {
    /// Record id as text, without JSON quoting
    pub fn id_text(&self) -> Option<String> {
        match self.id.as_ref()? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Attachments come either as objects or as bare labels
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum AttachmentEntry {
    /// Attachment object
    File(Attachment),
    /// Bare string label, carries nothing downloadable
    Label(String),
    /// Anything else the site may send
    Other(serde_json::Value),
}

/// One episode of a course
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    /// Record id
    #[serde(rename = "_id", default)]
    pub id: Option<serde_json::Value>,
    /// Program serial number
    #[serde(default)]
    pub program_sn: Option<u64>,
    /// Episode number within the course, starting at 1
    pub part: u32,
    /// Episode title
    #[serde(default)]
    pub name: String,
    /// Release date as sent by the site
    #[serde(default)]
    pub release_date: Option<String>,
    /// Whether the episode is published
    #[serde(default = "default_on_shelf")]
    pub on_shelf: bool,
    /// Audio file
    pub audio: AudioInfo,
    /// Attached course materials
    #[serde(default, rename = "attachment")]
    pub attachments: Vec<AttachmentEntry>,
    /// Creation timestamp
    #[serde(default)]
    pub created_at: Option<String>,
    /// Last update timestamp
    #[serde(default)]
    pub update_at: Option<String>,
}

fn default_on_shelf() -> bool {
    true
}

impl Episode {
    /// Reject records that cannot be turned into a download
    pub fn validate(&self) -> Result<(), SiteError> {
        if self.part == 0 {
            return Err(SiteError::InvalidEpisode(format!(
                "episode '{}' has part number 0",
                self.name
            )));
        }
        if self.audio.key.trim().is_empty() {
            return Err(SiteError::InvalidEpisode(format!(
                "episode {} has no audio key",
                self.part
            )));
        }
        Ok(())
    }

    /// Attachment objects, skipping bare labels
    pub fn files(&self) -> impl Iterator<Item = &Attachment> {
        self.attachments.iter().filter_map(|entry| match entry {
            AttachmentEntry::File(file) => Some(file),
            AttachmentEntry::Other(value) if value.is_object() => {
                tracing::warn!(
                    part = self.part,
                    attachment = %value,
                    "Attachment object has an unexpected shape, skipping it"
                );
                None
            }
            _ => None,
        })
    }

    /// Duration in minutes, for display
    pub fn duration_minutes(&self) -> f64 {
        self.audio.duration / 60.0
    }
}

/// The `reducers.languageEpisode` object of a course page
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageEpisodeData {
    /// Response status
    #[serde(default)]
    pub status: Option<String>,
    /// Total episodes reported for the course
    #[serde(default)]
    pub count: Option<u32>,
    /// Language id
    #[serde(default)]
    pub language_id: Option<String>,
    /// Raw episode records, validated one by one with [`Episode::validate`]
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
}

impl LanguageEpisodeData {
    /// Decode and validate every record; the first bad one fails the page
    pub fn episodes(self) -> Result<Vec<Episode>, SiteError> {
        self.data
            .into_iter()
            .enumerate()
            .map(|(i, raw)| {
                let episode: Episode = serde_json::from_value(raw)
                    .map_err(|e| SiteError::InvalidEpisode(format!("record {i}: {e}")))?;
                episode.validate()?;
                Ok(episode)
            })
            .collect()
    }
}

/// A course material ready to be downloaded
#[derive(Clone, Debug, PartialEq)]
pub struct CourseMaterial {
    /// Episode the material belongs to
    pub episode: u32,
    /// Attachment as listed on the page
    pub attachment: Attachment,
    /// Absolute download URL
    pub url: String,
}

/// Summary returned by [`SiteClient::course_info`](super::SiteClient::course_info)
#[derive(Clone, Debug, Serialize)]
pub struct CourseInfo {
    /// Course id
    pub course_id: u32,
    /// Course URL as given
    pub url: String,
    /// Episodes seen on the first few pages
    pub episodes_found: usize,
    /// Highest part number on the first page
    pub max_episode_found: u32,
    /// First episode, for display
    pub sample_episode: Option<Episode>,
}
