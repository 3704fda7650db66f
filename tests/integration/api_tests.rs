//! API integration tests.
//!
//! Tests verify:
//! - Upload, load and listing of slides
//! - Tile retrieval, headers and error cases
//! - Custom transform updates applied to the next tile
//! - Segmentation overlay queries
//! - The preprocessing job from start to result

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;

use wsi_workbench::overlay::SegmentationSet;

use super::test_utils::{
    body_bytes, close_to, decode_jpeg, is_valid_jpeg, json_body, spotty_slide, uniform_slide,
    upload_request, write_slide, TestApp, BACKGROUND, SPOT_COUNT,
};

const INVERTED: [u8; 3] = [55, 135, 195];

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();

    let response = app.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

// =============================================================================
// Upload and Load
// =============================================================================

#[tokio::test]
async fn test_upload_makes_slide_current() {
    let app = TestApp::new();

    let response = app
        .send(upload_request("file", "my slide.tif", &uniform_slide()))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["message"], "File uploaded and processed successfully");
    assert_eq!(body["filename"], "my_slide.tif");
    assert_eq!(
        body["dimensions"],
        json!([[2048, 1536], [1024, 768], [512, 384]])
    );
    assert!(app.upload_dir.join("my_slide.tif").is_file());

    let response = app.get("/slide/0/0_0.jpeg").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_upload_without_file_part() {
    let app = TestApp::new();

    let response = app
        .send(upload_request("attachment", "slide.tif", b"data"))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["message"], "No file part");
}

#[tokio::test]
async fn test_upload_without_filename() {
    let app = TestApp::new();

    let response = app.send(upload_request("file", "", b"data")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["message"], "No selected file");
}

#[tokio::test]
async fn test_upload_disallowed_extension() {
    let app = TestApp::new();

    let response = app.send(upload_request("file", "notes.txt", b"data")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["message"], "File type not allowed");
    assert!(!app.upload_dir.join("notes.txt").exists());
}

#[tokio::test]
async fn test_upload_over_limit_leaves_nothing_behind() {
    let app = TestApp::with_upload_limit(1024);

    let response = app
        .send(upload_request("file", "big.tif", &vec![0u8; 4096]))
        .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let names: Vec<_> = std::fs::read_dir(&app.upload_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert!(names.is_empty(), "left behind: {:?}", names);
}

#[tokio::test]
async fn test_upload_of_non_slide_fails_to_open() {
    let app = TestApp::new();

    let response = app
        .send(upload_request("file", "fake.svs", b"this is not a tiff file"))
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("Error processing file"));

    // Nothing became current.
    let response = app.get("/slide/0/0_0.jpeg").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_load_existing_slide() {
    let app = TestApp::new();

    let body = app.load_slide("uniform.tif", &uniform_slide()).await;
    assert_eq!(body["message"], "Slide loaded successfully");
    assert_eq!(body["filename"], "uniform.tif");
    assert_eq!(body["dimensions"][0], json!([2048, 1536]));
}

#[tokio::test]
async fn test_load_missing_slide() {
    let app = TestApp::new();

    let response = app.get("/load/absent.svs").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        json_body(response).await["message"],
        "File \"absent.svs\" not found"
    );
}

#[tokio::test]
async fn test_list_files() {
    let app = TestApp::new();
    write_slide(&app.upload_dir, "b.svs", &[0u8; 2048]);
    write_slide(&app.upload_dir, "a.tif", &[0u8; 100]);
    write_slide(&app.upload_dir, ".c.tif.part", &[0u8; 10]);

    let response = app.get("/list-files").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    let files = body["files"].as_array().unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0]["filename"], "a.tif");
    assert_eq!(files[0]["size"], 100);
    assert_eq!(files[1]["filename"], "b.svs");
    assert_eq!(files[1]["size_kb"], 2.0);
    assert!(!files[1]["modified"].as_str().unwrap().is_empty());
}

// =============================================================================
// Tiles
// =============================================================================

#[tokio::test]
async fn test_tile_without_slide() {
    let app = TestApp::new();

    let response = app.get("/slide/0/0_0.jpeg").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    assert_eq!(body["error"], "no_slide_loaded");
    assert_eq!(body["message"], "No slide loaded");
    assert_eq!(body["status"], 400);
}

#[tokio::test]
async fn test_tile_content_and_headers() {
    let app = TestApp::new();
    app.load_slide("uniform.tif", &uniform_slide()).await;

    let response = app.get("/slide/0/0_0.jpeg").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "image/jpeg");
    assert_eq!(response.headers()["cache-control"], "no-store");
    assert_eq!(response.headers()["x-tile-cache-hit"], "false");

    let body = body_bytes(response).await;
    assert!(is_valid_jpeg(&body));

    // Viewer level 0 reads 512x512 from the 512x384 coarsest level.
    let tile = decode_jpeg(&body);
    assert_eq!(tile.dimensions(), (512, 512));
    assert!(close_to(tile.get_pixel(10, 10), BACKGROUND, 10));
    assert!(close_to(tile.get_pixel(10, 500), [0, 0, 0], 10));
}

#[tokio::test]
async fn test_repeated_tile_is_cached() {
    let app = TestApp::new();
    app.load_slide("uniform.tif", &uniform_slide()).await;

    let first = app.get("/slide/1/0_0.jpeg").await;
    assert_eq!(first.headers()["x-tile-cache-hit"], "false");

    let second = app.get("/slide/1/0_0.jpeg").await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers()["x-tile-cache-hit"], "true");
}

#[tokio::test]
async fn test_loading_a_slide_resets_the_cache() {
    let app = TestApp::new();
    app.load_slide("uniform.tif", &uniform_slide()).await;
    app.get("/slide/0/0_0.jpeg").await;

    app.load_slide("spotty.tif", &spotty_slide()).await;
    let response = app.get("/slide/0/0_0.jpeg").await;
    assert_eq!(response.headers()["x-tile-cache-hit"], "false");
}

#[tokio::test]
async fn test_deepest_viewer_level() {
    let app = TestApp::new();
    app.load_slide("uniform.tif", &uniform_slide()).await;

    let response = app.get("/slide/2/0_0.jpeg").await;
    assert_eq!(response.status(), StatusCode::OK);

    let tile = decode_jpeg(&body_bytes(response).await);
    assert_eq!(tile.dimensions(), (512, 512));
    assert!(close_to(tile.get_pixel(100, 100), BACKGROUND, 10));
}

#[tokio::test]
async fn test_malformed_tile_names() {
    let app = TestApp::new();
    app.load_slide("uniform.tif", &uniform_slide()).await;

    for uri in [
        "/slide/0/0-0.jpeg",
        "/slide/0/0_0.png",
        "/slide/x/0_0.jpeg",
        "/slide/0/a_b.jpeg",
    ] {
        let response = app.get(uri).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
    }
}

#[tokio::test]
async fn test_tile_outside_slide() {
    let app = TestApp::new();
    app.load_slide("uniform.tif", &uniform_slide()).await;

    let response = app.get("/slide/0/5_0.jpeg").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = json_body(response).await;
    assert_eq!(body["error"], "processing_error");
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("Error processing tile"));
}

// =============================================================================
// Custom Transform
// =============================================================================

#[tokio::test]
async fn test_script_update_applies_to_next_tile() {
    let app = TestApp::new();
    app.load_slide("uniform.tif", &uniform_slide()).await;

    let before = decode_jpeg(&body_bytes(app.get("/slide/0/0_0.jpeg").await).await);
    assert!(close_to(before.get_pixel(10, 10), BACKGROUND, 10));

    let response = app
        .post_json(
            "/update-script",
            json!({"script": "fn process_tile(t) { t.invert() }"}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await["message"],
        "Script updated successfully"
    );
    assert!(app.script_path.is_file());

    // Same tile, served from the cache, now inverted.
    let response = app.get("/slide/0/0_0.jpeg").await;
    assert_eq!(response.headers()["x-tile-cache-hit"], "true");
    let after = decode_jpeg(&body_bytes(response).await);
    assert!(
        close_to(after.get_pixel(10, 10), INVERTED, 12),
        "{:?}",
        after.get_pixel(10, 10)
    );
}

#[tokio::test]
async fn test_broken_script_fails_tiles_until_fixed() {
    let app = TestApp::new();
    app.load_slide("uniform.tif", &uniform_slide()).await;

    app.post_json("/update-script", json!({"script": "fn process_tile(t) {"}))
        .await;
    let response = app.get("/slide/0/0_0.jpeg").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["error"], "transform_error");
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("Error inside 'process_tile': "));

    app.post_json("/update-script", json!({"script": "fn process_tile(t) { t }"}))
        .await;
    let response = app.get("/slide/0/0_0.jpeg").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_script_runtime_error() {
    let app = TestApp::new();
    app.load_slide("uniform.tif", &uniform_slide()).await;

    app.post_json(
        "/update-script",
        json!({"script": "fn process_tile(t) { throw \"bad tile\"; }"}),
    )
    .await;

    let response = app.get("/slide/0/0_0.jpeg").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let message = json_body(response).await["message"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(message.starts_with("Error inside 'process_tile': "));
    assert!(message.contains("bad tile"));
}

#[tokio::test]
async fn test_script_with_wrong_arity_fails_tiles() {
    let app = TestApp::new();
    app.load_slide("uniform.tif", &uniform_slide()).await;

    app.post_json(
        "/update-script",
        json!({"script": "fn process_tile(t, extra) { t.invert() }"}),
    )
    .await;

    let response = app.get("/slide/0/0_0.jpeg").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let message = json_body(response).await["message"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(message.starts_with("Error inside 'process_tile': "));
}

#[tokio::test]
async fn test_script_update_requires_content() {
    let app = TestApp::new();

    for body in [json!({}), json!({"script": ""}), json!({"code": "x"})] {
        let response = app.post_json("/update-script", body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await["message"],
            "No script content provided"
        );
    }
    assert!(!app.script_path.exists());
}

// =============================================================================
// Segmentation Overlays
// =============================================================================

fn segmentation(centroids: usize, contours: usize) -> SegmentationSet {
    SegmentationSet {
        centroids: (0..centroids).map(|i| [i as f64, 2.0 * i as f64]).collect(),
        contours: (0..contours)
            .map(|i| vec![[i as f64, 0.0], [i as f64 + 1.0, 0.0], [i as f64, 1.0]])
            .collect(),
    }
}

#[tokio::test]
async fn test_segmentation_caps_contours() {
    let app = TestApp::new();
    app.state
        .overlays
        .write("big.svs", &segmentation(500, 25_000))
        .await
        .unwrap();

    let response = app.get("/api/segmentation?type=contour&slide=big.svs").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["type"], "contour");
    assert_eq!(body["data"].as_array().unwrap().len(), 10_000);
    assert_eq!(body["data"][0], json!([[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]));

    let response = app.get("/api/segmentation?type=centroid&slide=big.svs").await;
    let body = json_body(response).await;
    assert_eq!(body["type"], "centroid");
    assert_eq!(body["data"].as_array().unwrap().len(), 500);
    assert_eq!(body["data"][3], json!([3.0, 6.0]));
}

#[tokio::test]
async fn test_segmentation_small_contour_set_is_complete() {
    let app = TestApp::new();
    app.state
        .overlays
        .write("small.svs", &segmentation(0, 500))
        .await
        .unwrap();

    let response = app.get("/api/segmentation?type=contour&slide=small.svs").await;
    let body = json_body(response).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 500);
}

#[tokio::test]
async fn test_segmentation_defaults_to_current_slide_centroids() {
    let app = TestApp::new();
    app.load_slide("uniform.tif", &uniform_slide()).await;
    app.state
        .overlays
        .write("uniform.tif", &segmentation(7, 1))
        .await
        .unwrap();

    let response = app.get("/api/segmentation").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["type"], "centroid");
    assert_eq!(body["data"].as_array().unwrap().len(), 7);

    // Sidecar files stay out of the listing.
    let listing = json_body(app.get("/list-files").await).await;
    assert_eq!(listing["files"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_segmentation_errors() {
    let app = TestApp::new();

    let response = app.get("/api/segmentation?type=outline&slide=a.svs").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["message"], "Invalid type");

    let response = app.get("/api/segmentation?type=centroid&slide=a.svs").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        json_body(response).await["message"],
        "Segmentation file not found"
    );

    let response = app.get("/api/segmentation?type=centroid").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["message"], "No slide loaded");
}

// =============================================================================
// Preprocessing
// =============================================================================

async fn wait_for_result(app: &TestApp) -> (StatusCode, serde_json::Value) {
    for _ in 0..600 {
        let response = app.get("/get-result").await;
        if response.status() != StatusCode::ACCEPTED {
            let status = response.status();
            return (status, json_body(response).await);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("preprocessing did not finish");
}

#[tokio::test]
async fn test_preprocess_without_slide() {
    let app = TestApp::new();

    let response = app.post_json("/run-preprocess", json!({})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["message"], "No slide loaded");
}

#[tokio::test]
async fn test_result_before_any_job() {
    let app = TestApp::new();

    let response = app.get("/get-result").await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(
        json_body(response).await["message"],
        "Processing not complete yet"
    );

    let progress = json_body(app.get("/get-progress").await).await;
    assert_eq!(progress["state"], "pending");
    assert_eq!(progress["progress"], 0);
}

#[tokio::test]
async fn test_preprocess_detects_spots() {
    let app = TestApp::new();
    app.load_slide("spotty.tif", &spotty_slide()).await;

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/run-preprocess")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["message"], "Preprocess started");
    assert_eq!(body["job"], 1);

    let (status, body) = wait_for_result(&app).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Run preprocess finished successfully");
    assert_eq!(body["number_of_nuclei"], SPOT_COUNT);

    let progress = json_body(app.get("/get-progress").await).await;
    assert_eq!(progress["state"], "succeeded");
    assert_eq!(progress["progress"], 100);
    assert_eq!(progress["slide"], "spotty.tif");

    // Centroids come back in level-0 coordinates: the first spot spans
    // 128..160 on level 0.
    let overlay = json_body(app.get("/api/segmentation?type=centroid").await).await;
    let centroids = overlay["data"].as_array().unwrap();
    assert_eq!(centroids.len(), SPOT_COUNT);
    let near_first = centroids.iter().any(|c| {
        let x = c[0].as_f64().unwrap();
        let y = c[1].as_f64().unwrap();
        (x - 144.0).abs() < 8.0 && (y - 144.0).abs() < 8.0
    });
    assert!(near_first, "{:?}", &centroids[..3]);

    let overlay = json_body(app.get("/api/segmentation?type=contour").await).await;
    assert_eq!(overlay["data"].as_array().unwrap().len(), SPOT_COUNT);
}

#[tokio::test]
async fn test_preprocess_with_bad_level_fails() {
    let app = TestApp::new();
    app.load_slide("spotty.tif", &spotty_slide()).await;

    let response = app
        .post_json("/run-preprocess", json!({"params": {"level": 9}}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let (status, body) = wait_for_result(&app).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "job_failed");
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("Preprocessing failed"));
}

#[tokio::test]
async fn test_preprocess_rejects_malformed_params() {
    let app = TestApp::new();
    app.load_slide("spotty.tif", &spotty_slide()).await;

    let response = app
        .post_json("/run-preprocess", json!({"params": {"min_area": "lots"}}))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
