use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use playfile::commands::playback::utils::{
    attachment::{AttachmentRef, AttachmentStore, HttpAttachmentStore},
    playfile_error::PlayfileError,
};

use crate::common::fixtures::SAMPLE_AUDIO;

fn attachment_at(url: String) -> AttachmentRef {
    AttachmentRef {
        filename: "track.ogg".to_string(),
        size: SAMPLE_AUDIO.len() as u64,
        url,
    }
}

#[tokio::test]
async fn downloads_attachment_bytes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/attachments/1/2/track.ogg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(SAMPLE_AUDIO))
        .expect(1)
        .mount(&server)
        .await;

    let store = HttpAttachmentStore::new(reqwest::Client::new());
    let bytes = store
        .fetch(&attachment_at(format!("{}/attachments/1/2/track.ogg", server.uri())))
        .await
        .unwrap();

    assert_eq!(bytes, SAMPLE_AUDIO);
}

#[tokio::test]
async fn http_errors_are_staging_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = HttpAttachmentStore::new(reqwest::Client::new());
    let result = store
        .fetch(&attachment_at(format!("{}/attachments/gone.ogg", server.uri())))
        .await;

    assert_matches!(result, Err(PlayfileError::Staging(_)));
}

#[tokio::test]
async fn malformed_url_is_rejected_without_a_request() {
    let store = HttpAttachmentStore::new(reqwest::Client::new());
    let result = store.fetch(&attachment_at("not a url".to_string())).await;
    tokio_test::assert_err!(&result);
    assert_matches!(result, Err(PlayfileError::Staging(reason)) if reason.contains("bad attachment url"));
}
