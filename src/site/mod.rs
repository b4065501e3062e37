//! Course site scraping
//!
//! Course pages embed their data as a JSON blob assigned to
//! `window.__PRELOADED_STATE__`; the episode list lives at
//! `reducers.languageEpisode`. This module turns those pages into
//! [`DownloadItem`]s for the batch orchestrator.

mod models;

pub use models::{
    Attachment, AttachmentEntry, AudioInfo, CourseInfo, CourseMaterial, Episode,
    LanguageEpisodeData,
};

use crate::config::{EpisodeRange, SiteConfig};
use crate::error::{Result, SiteError};
use crate::transfer::HttpTransfer;
use crate::types::{DownloadItem, ItemKind};
use regex::Regex;
use std::sync::{Arc, OnceLock};

/// Directory under the course folder holding attachments
pub const MATERIALS_DIR: &str = "course_materials";

/// Pages scanned by [`SiteClient::course_info`]
const INFO_SCAN_PAGES: u32 = 5;

const MAX_FOLDER_NAME_CHARS: usize = 50;

fn course_id_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/viewalllang/(\d+)").ok())
        .as_ref()
}

fn preloaded_state_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"window\.__PRELOADED_STATE__ = (\{.+\})").ok())
        .as_ref()
}

fn course_name_res() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        [r"\d+(.+?)\.mp3$", r"\d+(.+?)$", r"(.+?)\.mp3$"]
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect()
    })
}

/// Pull the numeric course id out of a `/viewalllang/<id>` URL
pub fn extract_course_id(url: &str) -> std::result::Result<u32, SiteError> {
    course_id_re()
        .and_then(|re| re.captures(url))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .ok_or_else(|| SiteError::InvalidCourseUrl(url.to_string()))
}

/// Find and parse the embedded state blob of a page
pub fn extract_preloaded_state(
    html: &str,
    page: u32,
) -> std::result::Result<serde_json::Value, SiteError> {
    let blob = preloaded_state_re()
        .and_then(|re| re.captures(html))
        .and_then(|caps| caps.get(1))
        .ok_or(SiteError::MissingState { page })?;
    serde_json::from_str(blob.as_str()).map_err(|source| SiteError::InvalidJson { page, source })
}

/// Episodes listed on one page
///
/// A page without state, or whose state lacks the episode list, is treated
/// as empty. Malformed JSON and malformed episode records are errors.
pub fn parse_episode_page(html: &str, page: u32) -> std::result::Result<Vec<Episode>, SiteError> {
    let state = match extract_preloaded_state(html, page) {
        Ok(state) => state,
        Err(SiteError::MissingState { page }) => {
            tracing::warn!(page, "No embedded state found on page");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };

    let Some(section) = state.pointer("/reducers/languageEpisode") else {
        let keys: Vec<&String> = state
            .as_object()
            .map(|o| o.keys().collect())
            .unwrap_or_default();
        tracing::warn!(page, ?keys, "Page state has no reducers.languageEpisode");
        return Ok(Vec::new());
    };

    let data: LanguageEpisodeData = serde_json::from_value(section.clone())
        .map_err(|e| SiteError::InvalidEpisode(format!("page {page}: {e}")))?;
    data.episodes()
}

/// Make a course name usable as a directory name
///
/// Strips common lesson and course prefixes and suffixes, characters that
/// are illegal in file names, and all whitespace; keeps at most 50
/// characters.
pub fn clean_folder_name(name: &str) -> String {
    static AFFIXES: OnceLock<Vec<Regex>> = OnceLock::new();
    let affixes = AFFIXES.get_or_init(|| {
        [r"^(第\d+課|課程|教學)", r"(課程|教學|講義)$"]
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect()
    });

    let mut cleaned = name.to_string();
    for re in affixes {
        cleaned = re.replace(&cleaned, "").into_owned();
    }
    cleaned
        .chars()
        .filter(|c| !is_illegal_file_char(*c) && !c.is_whitespace())
        .take(MAX_FOLDER_NAME_CHARS)
        .collect()
}

fn is_illegal_file_char(c: char) -> bool {
    matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*')
}

fn replace_illegal(name: &str) -> String {
    name.chars()
        .map(|c| if is_illegal_file_char(c) { '_' } else { c })
        .collect()
}

/// Course folder name derived from the first episode of a course
///
/// Tries the audio file name (`10001coursename.mp3` gives `coursename`),
/// then the first word of the title, then `course_<id>`.
pub fn course_name_from(episode: Option<&Episode>, course_id: u32) -> String {
    let fallback = format!("course_{course_id}");
    let Some(episode) = episode else {
        return fallback;
    };

    for re in course_name_res() {
        if let Some(m) = re.captures(&episode.audio.name).and_then(|caps| caps.get(1)) {
            let name = clean_folder_name(m.as_str());
            if !name.is_empty() {
                return name;
            }
        }
    }

    let words: Vec<&str> = episode.name.split(' ').collect();
    if words.len() > 1 {
        let name = clean_folder_name(words[0]);
        if !name.is_empty() {
            return name;
        }
    }

    fallback
}

/// Target file name for an episode's audio
///
/// The source file name when the site provides one, otherwise
/// `<5-digit part>_<title>.mp3`.
pub fn episode_file_name(episode: &Episode) -> String {
    let source = episode.audio.name.trim();
    if !source.is_empty() {
        return source.replace(['/', '\\'], "_");
    }
    format!(
        "{:05}_{}.mp3",
        episode.part,
        episode.name.replace(['/', '\\'], "_")
    )
}

/// Target file name for a course material
///
/// Prefixed with `Ep<NN>_` unless the name already starts with the
/// zero-padded episode number.
pub fn material_file_name(attachment: &Attachment, episode: u32) -> String {
    let name = attachment.name.as_deref().map(str::trim).unwrap_or_default();
    let file_name = if name.is_empty() {
        let key = attachment
            .key
            .clone()
            .or_else(|| attachment.id_text())
            .unwrap_or_else(|| "unknown".to_string());
        format!("Ep{episode:02}_course_material_{key}.pdf")
    } else if name.starts_with(&format!("{episode:02}")) {
        name.to_string()
    } else {
        let (stem, ext) = name.rsplit_once('.').unwrap_or((name, "pdf"));
        format!("Ep{episode:02}_{stem}.{ext}")
    };

    let mut file_name = replace_illegal(&file_name).trim().to_string();
    if !file_name.contains('.') {
        file_name.push_str(".pdf");
    }
    file_name
}

/// Attachments with a key, across `episodes`
pub fn detect_materials(base_url: &str, episodes: &[Episode]) -> Vec<CourseMaterial> {
    let base = base_url.trim_end_matches('/');
    let materials: Vec<CourseMaterial> = episodes
        .iter()
        .flat_map(|episode| {
            episode.files().filter_map(move |file| {
                let key = file.key.as_deref().filter(|k| !k.is_empty())?;
                Some(CourseMaterial {
                    episode: episode.part,
                    attachment: file.clone(),
                    url: format!("{base}/api/files/{key}"),
                })
            })
        })
        .collect();

    if materials.is_empty() {
        tracing::info!("No course materials found");
    } else {
        let mut with_materials: Vec<u32> = materials.iter().map(|m| m.episode).collect();
        with_materials.dedup();
        tracing::info!(
            materials = materials.len(),
            episodes = with_materials.len(),
            "Found course materials"
        );
    }
    materials
}

/// Build the batch: episode audio first, then materials under
/// [`MATERIALS_DIR`]
///
/// Records that cannot form a valid item are logged and left out.
pub fn build_items(
    base_url: &str,
    episodes: &[Episode],
    materials: &[CourseMaterial],
) -> Vec<DownloadItem> {
    let base = base_url.trim_end_matches('/');
    let audio = episodes.iter().map(|episode| {
        DownloadItem::new(
            episode.part,
            format!("{base}/api/audio/{}", episode.audio.key),
            episode_file_name(episode),
            ItemKind::Audio,
        )
    });
    let files = materials.iter().map(|material| {
        DownloadItem::new(
            material.episode,
            material.url.clone(),
            format!(
                "{MATERIALS_DIR}/{}",
                material_file_name(&material.attachment, material.episode)
            ),
            ItemKind::Material,
        )
    });

    audio
        .chain(files)
        .filter_map(|item| {
            item.map_err(|e| tracing::warn!(error = %e, "Skipping unusable record"))
                .ok()
        })
        .collect()
}

/// Reads course pages through the shared HTTP client
#[derive(Clone)]
pub struct SiteClient {
    http: Arc<HttpTransfer>,
    config: SiteConfig,
}

impl SiteClient {
    /// Wrap an HTTP client; requests share its retry policy and throttle
    pub fn new(http: Arc<HttpTransfer>, config: SiteConfig) -> Self {
        Self { http, config }
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    /// URL of page `page` (1-based) of a course listing
    pub fn page_url(&self, course_id: u32, page: u32) -> String {
        format!("{}/viewalllang/{course_id}?page={page}", self.base())
    }

    /// Episodes listed on one page
    pub async fn episodes_on_page(&self, course_id: u32, page: u32) -> Result<Vec<Episode>> {
        let url = self.page_url(course_id, page);
        tracing::info!(page, url = %url, "Scraping page");
        let html = self.http.get_text(&url).await?;
        let episodes = parse_episode_page(&html, page)?;
        tracing::info!(page, episodes = episodes.len(), "Parsed page");
        Ok(episodes)
    }

    /// Episodes within `range`, sorted by part
    ///
    /// Walks only the pages that can hold the range. A page that fails is
    /// logged and skipped.
    pub async fn collect_episodes(&self, course_id: u32, range: EpisodeRange) -> Vec<Episode> {
        let per_page = self.config.episodes_per_page;
        let (first, last) = (range.start_page(per_page), range.end_page(per_page));
        tracing::info!(
            start = range.start(),
            end = range.end(),
            first_page = first,
            last_page = last,
            "Collecting episodes"
        );

        let mut episodes = Vec::new();
        for page in first..=last {
            match self.episodes_on_page(course_id, page).await {
                Ok(found) => {
                    episodes.extend(found.into_iter().filter(|e| range.contains(e.part)));
                }
                Err(e) => tracing::error!(page, error = %e, "Failed to process page"),
            }
        }
        episodes.sort_by_key(|e| e.part);
        tracing::info!(collected = episodes.len(), "Collected episodes");
        episodes
    }

    /// Highest episode number in the course
    ///
    /// Walks pages until one comes back empty or short, at most
    /// `max_scan_pages`. A failure on the first page is an error; a failure
    /// later ends the walk with what was found so far.
    pub async fn total_episodes(&self, course_id: u32) -> Result<u32> {
        tracing::info!(course_id, "Scanning course for total episodes");
        let mut max_part = 0;

        for page in 1..=self.config.max_scan_pages.max(1) {
            let episodes = match self.episodes_on_page(course_id, page).await {
                Ok(episodes) => episodes,
                Err(e) if page > 1 => {
                    tracing::warn!(page, error = %e, "Stopping episode scan early");
                    break;
                }
                Err(e) => return Err(e),
            };
            let Some(page_max) = episodes.iter().map(|e| e.part).max() else {
                break;
            };
            max_part = max_part.max(page_max);
            tracing::debug!(page, page_max, "Scanned page");

            if episodes.len() < self.config.episodes_per_page as usize {
                break;
            }
        }

        if max_part == 0 {
            return Err(SiteError::EmptyCourse(course_id).into());
        }
        tracing::info!(course_id, total = max_part, "Total episodes found");
        Ok(max_part)
    }

    /// Folder name for the course, see [`course_name_from`]
    pub async fn course_name(&self, course_id: u32) -> String {
        match self.episodes_on_page(course_id, 1).await {
            Ok(episodes) => course_name_from(episodes.first(), course_id),
            Err(e) => {
                tracing::error!(error = %e, "Failed to extract course name");
                course_name_from(None, course_id)
            }
        }
    }

    /// Whether `url` names a course with at least one episode
    pub async fn validate_course_url(&self, url: &str) -> bool {
        let Ok(course_id) = extract_course_id(url) else {
            tracing::error!(url, "Cannot extract course id");
            return false;
        };
        match self.episodes_on_page(course_id, 1).await {
            Ok(episodes) => !episodes.is_empty(),
            Err(e) => {
                tracing::error!(url, error = %e, "Course URL validation failed");
                false
            }
        }
    }

    /// Overview of a course from its first few pages
    pub async fn course_info(&self, url: &str) -> Result<CourseInfo> {
        let course_id = extract_course_id(url)?;
        let first = self.episodes_on_page(course_id, 1).await?;
        if first.is_empty() {
            return Err(SiteError::EmptyCourse(course_id).into());
        }

        let mut episodes_found = first.len();
        for page in 2..=INFO_SCAN_PAGES {
            match self.episodes_on_page(course_id, page).await {
                Ok(more) if !more.is_empty() => episodes_found += more.len(),
                _ => break,
            }
        }

        Ok(CourseInfo {
            course_id,
            url: url.to_string(),
            episodes_found,
            max_episode_found: first.iter().map(|e| e.part).max().unwrap_or(0),
            sample_episode: first.into_iter().next(),
        })
    }
}
