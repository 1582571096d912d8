use flip2pdf::{Config, Downloader, FailurePolicy, FetchOptions, RunOutcome};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use lopdf::Document;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BOOK_URL: &str = "https://anyflip.com/abcd/efgh/basic";
const MANIFEST_PATH: &str = "/abcd/efgh/mobile/javascript/config.js";

fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([10, 120, 200])));
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, format).unwrap();
    buffer.into_inner()
}

async fn serve_manifest(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path(MANIFEST_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn serve_mobile_pages(server: &MockServer, count: usize) {
    for page in 1..=count {
        Mock::given(method("GET"))
            .and(path(format!("/abcd/efgh/files/mobile/{}.jpg", page)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(encode(16, 24, ImageFormat::Jpeg)))
            .mount(server)
            .await;
    }
}

fn config(server: &MockServer, output_dir: &Path) -> Config {
    Config {
        host: Url::parse(&server.uri()).unwrap(),
        output_dir: output_dir.to_path_buf(),
        fetch: FetchOptions {
            concurrency: 2,
            max_retries: 2,
            retry_delay: Duration::from_millis(10),
        },
        ..Config::default()
    }
}

fn page_count(pdf: &Path) -> usize {
    Document::load(pdf).unwrap().get_pages().len()
}

async fn page_requests(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|request| request.url.path().contains("/files/"))
        .count()
}

fn created(outcome: RunOutcome) -> PathBuf {
    match outcome {
        RunOutcome::Created(path) => path,
        other => panic!("expected a new PDF, got {:?}", other),
    }
}

#[tokio::test]
async fn sequential_book_becomes_pdf() {
    let server = MockServer::start().await;
    serve_manifest(&server, r#"bookConfig.bookTitle="My Book";bookConfig.totalPageCount=3;"#).await;
    serve_mobile_pages(&server, 3).await;

    let out = tempfile::tempdir().unwrap();
    let outcome = Downloader::new(config(&server, out.path()))
        .quiet()
        .run(BOOK_URL)
        .await
        .unwrap();

    let pdf = created(outcome);
    assert_eq!(pdf, out.path().join("My Book.pdf"));
    assert_eq!(page_count(&pdf), 3);
    assert!(!out.path().join("my-book").exists(), "staging directory should be removed");
}

#[tokio::test]
async fn second_run_leaves_existing_pdf_untouched() {
    let server = MockServer::start().await;
    serve_manifest(&server, r#"bookTitle="Repeat";totalPageCount=2"#).await;
    serve_mobile_pages(&server, 2).await;

    let out = tempfile::tempdir().unwrap();
    let pdf = created(
        Downloader::new(config(&server, out.path()))
            .quiet()
            .run(BOOK_URL)
            .await
            .unwrap(),
    );
    let first_bytes = std::fs::read(&pdf).unwrap();
    let requests_after_first_run = page_requests(&server).await;

    let outcome = Downloader::new(config(&server, out.path()))
        .quiet()
        .run(BOOK_URL)
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::AlreadyExists(pdf.clone()));
    assert_eq!(std::fs::read(&pdf).unwrap(), first_bytes);
    assert_eq!(page_requests(&server).await, requests_after_first_run);
}

#[tokio::test]
async fn explicit_file_names_are_fetched_from_large_folder() {
    let server = MockServer::start().await;
    serve_manifest(
        &server,
        r#"{"title":"Explicit"};totalPageCount="2";[{"n":["b2.png"]},{"n":["a1.png"]}]"#,
    )
    .await;
    for name in ["a1.png", "b2.png"] {
        Mock::given(method("GET"))
            .and(path(format!("/abcd/efgh/files/large/{}", name)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(encode(12, 8, ImageFormat::Png)))
            .mount(&server)
            .await;
    }

    let out = tempfile::tempdir().unwrap();
    let mut config = config(&server, out.path());
    config.keep_temp = true;
    let pdf = created(Downloader::new(config).quiet().run(BOOK_URL).await.unwrap());

    assert_eq!(page_count(&pdf), 2);
    let staging = out.path().join("explicit");
    assert!(staging.join("0000.png").exists());
    assert!(staging.join("0001.png").exists());
}

#[tokio::test]
async fn failed_page_blocks_assembly_by_default() {
    let server = MockServer::start().await;
    serve_manifest(&server, r#"bookTitle="Broken";totalPageCount=3"#).await;
    Mock::given(method("GET"))
        .and(path("/abcd/efgh/files/mobile/2.jpg"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    serve_mobile_pages(&server, 3).await;

    let out = tempfile::tempdir().unwrap();
    let result = Downloader::new(config(&server, out.path()))
        .quiet()
        .run(BOOK_URL)
        .await;

    let message = format!("{:#}", result.unwrap_err());
    assert!(message.contains("1 page could not be downloaded"), "{}", message);
    assert!(!out.path().join("Broken.pdf").exists());

    let staging = out.path().join("broken");
    assert!(staging.join("0000.jpg").exists());
    assert!(!staging.join("0001.jpg").exists());
    assert!(staging.join("0002.jpg").exists());
}

#[tokio::test]
async fn partial_policy_assembles_what_was_staged() {
    let server = MockServer::start().await;
    serve_manifest(&server, r#"bookTitle="Gappy";totalPageCount=3"#).await;
    Mock::given(method("GET"))
        .and(path("/abcd/efgh/files/mobile/2.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    serve_mobile_pages(&server, 3).await;

    let out = tempfile::tempdir().unwrap();
    let mut config = config(&server, out.path());
    config.failure_policy = FailurePolicy::AssemblePartial;
    let pdf = created(Downloader::new(config).quiet().run(BOOK_URL).await.unwrap());

    assert_eq!(page_count(&pdf), 2);
}

#[tokio::test]
async fn missing_manifest_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let out = tempfile::tempdir().unwrap();
    let result = Downloader::new(config(&server, out.path()))
        .quiet()
        .run(BOOK_URL)
        .await;

    assert!(result.is_err());
    assert_eq!(page_requests(&server).await, 0);
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn custom_staging_directory_and_title() {
    let server = MockServer::start().await;
    serve_manifest(&server, "totalPageCount=1").await;
    serve_mobile_pages(&server, 1).await;

    let out = tempfile::tempdir().unwrap();
    let staging = out.path().join("pages-here");
    let mut config = config(&server, out.path());
    config.title = Some("Chosen: Name".to_string());
    config.temp_dir = Some(staging.clone());
    config.keep_temp = true;

    let pdf = created(Downloader::new(config).quiet().run(BOOK_URL).await.unwrap());
    assert_eq!(pdf, out.path().join("Chosen Name.pdf"));
    assert!(staging.join("0000.jpg").exists());
}

#[tokio::test]
async fn cleanup_spares_files_already_in_staging_directory() {
    let server = MockServer::start().await;
    serve_manifest(&server, r#"bookTitle="Notes";totalPageCount=2"#).await;
    serve_mobile_pages(&server, 2).await;

    let out = tempfile::tempdir().unwrap();
    let notes = out.path().join("notes");
    std::fs::create_dir(&notes).unwrap();
    std::fs::write(notes.join("thesis.docx"), b"years of work").unwrap();

    let pdf = created(
        Downloader::new(config(&server, out.path()))
            .quiet()
            .run(BOOK_URL)
            .await
            .unwrap(),
    );

    assert_eq!(page_count(&pdf), 2);
    assert_eq!(std::fs::read(notes.join("thesis.docx")).unwrap(), b"years of work");
    assert!(!notes.join("0000.jpg").exists());
    assert!(!notes.join("0001.jpg").exists());
}

#[tokio::test]
async fn output_directory_as_staging_directory_keeps_the_pdf() {
    let server = MockServer::start().await;
    serve_manifest(&server, r#"bookTitle="Here";totalPageCount=1"#).await;
    serve_mobile_pages(&server, 1).await;

    let out = tempfile::tempdir().unwrap();
    let mut config = config(&server, out.path());
    config.temp_dir = Some(out.path().to_path_buf());

    let pdf = created(Downloader::new(config).quiet().run(BOOK_URL).await.unwrap());
    assert_eq!(page_count(&pdf), 1);
    assert!(out.path().exists());
    assert!(!out.path().join("0000.jpg").exists());
}
