//! Common test utilities for channelplus-dl integration tests

#![allow(dead_code)]

use channelplus_dl::Config;
use channelplus_dl::ledger::{LEDGER_FILE_NAME, LedgerConfig, ResumeLedger};
use serde_json::{Value, json};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Course id used by every fixture
pub const COURSE_ID: u32 = 390;

/// Size of every mocked audio body
pub const AUDIO_LEN: usize = 4096;

/// Episode record as embedded in a course page
pub fn episode(part: u32, attachments: Value) -> Value {
    json!({
        "_id": part,
        "programSn": 1,
        "part": part,
        "name": format!("Lesson {part}"),
        "releaseDate": "2021-03-01",
        "onShelf": true,
        "audio": {
            "key": format!("a{part}"),
            "name": format!("{}course.mp3", 10000 + part),
            "duration": 900.0,
            "sn": part
        },
        "attachment": attachments,
        "createdAt": "2021-03-01T00:00:00Z",
        "updateAt": "2021-03-01T00:00:00Z"
    })
}

/// Course page HTML embedding `episodes`
pub fn page_html(episodes: Vec<Value>) -> String {
    let state = json!({
        "reducers": {
            "languageEpisode": {
                "status": "success",
                "updated": false,
                "created": false,
                "deleted": false,
                "count": episodes.len(),
                "data": episodes
            }
        }
    });
    format!(
        "<!doctype html><html><body><div id=\"root\"></div>\
         <script>window.__PRELOADED_STATE__ = {state}</script></body></html>"
    )
}

/// Valid MP3 body starting with an ID3 tag
pub fn audio_body() -> Vec<u8> {
    let mut body = b"ID3\x03\x00".to_vec();
    body.resize(AUDIO_LEN, 0x55);
    body
}

/// Serve page `page` of the fixture course
pub async fn mount_page(server: &MockServer, page: u32, episodes: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path(format!("/viewalllang/{COURSE_ID}")))
        .and(query_param("page", page.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_string(page_html(episodes)))
        .mount(server)
        .await;
}

/// Serve a valid audio body for `key`, expecting exactly `hits` requests
pub async fn mount_audio(server: &MockServer, key: &str, hits: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/api/audio/{key}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(audio_body()))
        .expect(hits)
        .mount(server)
        .await;
}

/// Config aimed at `server`, downloading into `temp/<course>`, with short delays
pub fn test_config(server: &MockServer, temp: &TempDir) -> Config {
    let mut config = Config::default();
    config.site.base_url = server.uri();
    config.download.download_dir = temp.path().join("course");
    config.download.concurrent_downloads = 2;
    config.download.delay_between_requests = Duration::ZERO;
    config.download.timeout = Duration::from_secs(5);
    config.download.round_backoff = Duration::from_millis(10);
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(50);
    config
}

/// Keys recorded in the resume ledger under `dir`
pub fn ledger_keys(dir: &Path) -> Vec<String> {
    assert!(
        dir.join(LEDGER_FILE_NAME).exists(),
        "ledger missing in {}",
        dir.display()
    );
    ResumeLedger::new(dir, LedgerConfig::default())
        .load()
        .completed
        .into_iter()
        .collect()
}
