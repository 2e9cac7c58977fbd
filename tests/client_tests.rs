//! End-to-end tests of [`VixivClient`] against in-process mock backends.

use axum::body::Bytes;
use axum::extract::{Multipart, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use glam::DVec3;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use vixiv_client::processing::archive::write_npz;
use vixiv_client::{
    CellType, ClientConfig, MeshOptions, NdArray, PackOptions, PackingSource, ShaderRequest,
    TriangleMesh, VixivClient, VixivError, VoxelSampling,
};

// ============================================================================
// MOCK BACKEND
// ============================================================================

#[derive(Default)]
struct Recorder {
    hits: AtomicUsize,
    fields: Mutex<HashMap<String, String>>,
    file: Mutex<Option<Vec<u8>>>,
    headers: Mutex<Option<HeaderMap>>,
    json: Mutex<Option<Value>>,
}

impl Recorder {
    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    fn field(&self, name: &str) -> Option<String> {
        self.fields.lock().unwrap().get(name).cloned()
    }
}

type Shared = Arc<Recorder>;

async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn record_multipart(rec: &Recorder, mut multipart: Multipart) {
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        let data = field.bytes().await.unwrap();
        if name == "file" {
            *rec.file.lock().unwrap() = Some(data.to_vec());
        } else {
            let text = String::from_utf8(data.to_vec()).unwrap();
            rec.fields.lock().unwrap().insert(name, text);
        }
    }
}

/// Binary response flagged as successful through the `success` header.
fn binary_ok(body: Vec<u8>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("success", "true"), ("content-type", "application/octet-stream")],
        body,
    )
}

fn config(packing: &str, meshing: &str) -> ClientConfig {
    ClientConfig::new("test-key")
        .with_packing_url(packing)
        .with_meshing_url(meshing)
        .with_bucket(false)
}

fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

fn dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

fn tetrahedron_npz() -> Vec<u8> {
    let vertices = NdArray::new(
        vec![4, 3],
        vec![0., 0., 0., 1., 0., 0., 0., 1., 0., 0., 0., 1.],
    )
    .unwrap();
    let triangles = NdArray::new(
        vec![4, 3],
        vec![0., 2., 1., 0., 1., 3., 0., 3., 2., 1., 2., 3.],
    )
    .unwrap();
    write_npz([("vertices", &vertices), ("triangles", &triangles)]).unwrap()
}

fn layout_npz() -> Vec<u8> {
    let cell_size = NdArray::new(vec![3], vec![10., 10., 10.]).unwrap();
    let cell_centers = NdArray::from_points(&[DVec3::ZERO]);
    let rotation = NdArray::new(
        vec![3, 3],
        vec![1., 0., 0., 0., 1., 0., 0., 0., 1.],
    )
    .unwrap();
    let rotation_point = NdArray::new(vec![3], vec![0., 0., 0.]).unwrap();
    let candidates = NdArray::from_points(&[DVec3::ZERO, DVec3::new(10., 0., 0.)]);
    write_npz([
        ("cell_size", &cell_size),
        ("cell_centers", &cell_centers),
        ("rotation", &rotation),
        ("rotation_point", &rotation_point),
        ("candidate_centers", &candidates),
    ])
    .unwrap()
}

// ============================================================================
// STATUS AND ERROR CLASSIFICATION
// ============================================================================

#[tokio::test]
async fn test_status_reports_service_fields() {
    let rec: Shared = Arc::default();
    let app = Router::new()
        .route(
            "/v1/status",
            get(|State(rec): State<Shared>, headers: HeaderMap| async move {
                rec.hits.fetch_add(1, Ordering::SeqCst);
                *rec.headers.lock().unwrap() = Some(headers);
                Json(json!({"status": "online", "queue_length": 0}))
            }),
        )
        .with_state(rec.clone());
    let url = spawn(app).await;

    let client = VixivClient::new(config(&url, &url).with_user_id("tester")).unwrap();
    let status = client.status().await.unwrap();

    assert_eq!(status.get("status"), Some(&json!("online")));
    assert!(status.fields().any(|f| f == "queue_length"));
    assert_eq!(rec.hits(), 1);

    let headers = rec.headers.lock().unwrap().clone().unwrap();
    assert_eq!(headers.get("x-api-key").unwrap(), "test-key");
    assert_eq!(headers.get("id").unwrap(), "tester");
}

#[tokio::test]
async fn test_accelerators_use_meshing_backend() {
    let app = Router::new().route(
        "/v1/accelerators",
        get(|| async { Json(json!({"cpu": true, "cuda": false})) }),
    );
    let meshing = spawn(app).await;

    let client = VixivClient::new(config("http://127.0.0.1:1", &meshing)).unwrap();
    let report = client.accelerators().await.unwrap();
    assert_eq!(report.get("cpu"), Some(&json!(true)));
}

#[tokio::test]
async fn test_unauthorized_is_authentication_error_without_retry() {
    let rec: Shared = Arc::default();
    let app = Router::new()
        .route(
            "/v1/status",
            get(|State(rec): State<Shared>| async move {
                rec.hits.fetch_add(1, Ordering::SeqCst);
                StatusCode::UNAUTHORIZED
            }),
        )
        .with_state(rec.clone());
    let url = spawn(app).await;

    let client = VixivClient::new(config(&url, &url)).unwrap();
    let err = client.status().await.unwrap_err();
    assert!(matches!(err, VixivError::Authentication));
    assert_eq!(rec.hits(), 1);
}

#[tokio::test]
async fn test_too_many_requests_is_rate_limited_without_retry() {
    let rec: Shared = Arc::default();
    let app = Router::new()
        .route(
            "/v1/status",
            get(|State(rec): State<Shared>| async move {
                rec.hits.fetch_add(1, Ordering::SeqCst);
                StatusCode::TOO_MANY_REQUESTS
            }),
        )
        .with_state(rec.clone());
    let url = spawn(app).await;

    let client = VixivClient::new(config(&url, &url)).unwrap();
    let err = client.status().await.unwrap_err();
    assert!(matches!(err, VixivError::RateLimited));
    assert!(err.is_retryable());
    assert_eq!(rec.hits(), 1);
}

#[tokio::test]
async fn test_server_error_carries_message_and_traceback() {
    let app = Router::new().route(
        "/v1/status",
        get(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "boom", "traceback": "line 1"})),
            )
        }),
    );
    let url = spawn(app).await;

    let client = VixivClient::new(config(&url, &url)).unwrap();
    match client.status().await.unwrap_err() {
        VixivError::Request {
            status,
            message,
            traceback,
        } => {
            assert_eq!(status, 500);
            assert_eq!(message, "boom");
            assert_eq!(traceback.as_deref(), Some("line 1"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_placeholder_key_rejected() {
    let config = ClientConfig::new("YOUR_API_KEY").with_packing_url("http://127.0.0.1:1");
    assert!(matches!(
        VixivClient::new(config),
        Err(VixivError::Configuration(_))
    ));
}

// ============================================================================
// CELL VOLUME
// ============================================================================

#[tokio::test]
async fn test_cell_volume_returns_single_value() {
    let rec: Shared = Arc::default();
    let app = Router::new()
        .route(
            "/v1/cell-volume",
            post(|State(rec): State<Shared>, Json(body): Json<Value>| async move {
                rec.hits.fetch_add(1, Ordering::SeqCst);
                *rec.json.lock().unwrap() = Some(body);
                Json(json!({"success": true, "result": 82.5}))
            }),
        )
        .with_state(rec.clone());
    let url = spawn(app).await;

    let client = VixivClient::new(config(&url, &url)).unwrap();
    let volume = client
        .cell_volume(CellType::Fcc, 1.0, DVec3::splat(10.0))
        .await
        .unwrap();
    assert!(volume >= 0.0);
    assert_eq!(volume, 82.5);

    let body = rec.json.lock().unwrap().clone().unwrap();
    assert_eq!(body["cell_type"], "fcc");
    assert_eq!(body["beam_radius"], 1.0);
    assert_eq!(body["cell_size"], json!([10.0, 10.0, 10.0]));
}

#[tokio::test]
async fn test_cell_volume_reads_nested_volume() {
    let app = Router::new().route(
        "/v1/cell-volume",
        post(|| async { Json(json!({"success": true, "result": {"volume": 3.0}})) }),
    );
    let url = spawn(app).await;

    let client = VixivClient::new(config(&url, &url)).unwrap();
    let volume = client
        .cell_volume(CellType::Bcc, 0.5, DVec3::splat(5.0))
        .await
        .unwrap();
    assert_eq!(volume, 3.0);
}

#[tokio::test]
async fn test_declared_failure_is_application_error() {
    let app = Router::new().route(
        "/v1/cell-volume",
        post(|| async {
            Json(json!({"success": false, "error": "bad cell", "traceback": "tb"}))
        }),
    );
    let url = spawn(app).await;

    let client = VixivClient::new(config(&url, &url)).unwrap();
    match client
        .cell_volume(CellType::Fcc, 1.0, DVec3::splat(10.0))
        .await
        .unwrap_err()
    {
        VixivError::Application { message, traceback } => {
            assert_eq!(message, "bad cell");
            assert_eq!(traceback.as_deref(), Some("tb"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_unconfigured_backend_sends_nothing() {
    let rec: Shared = Arc::default();
    let app = Router::new()
        .fallback(|State(rec): State<Shared>| async move {
            rec.hits.fetch_add(1, Ordering::SeqCst);
            StatusCode::OK
        })
        .with_state(rec.clone());
    let url = spawn(app).await;

    let config = ClientConfig::new("test-key")
        .with_packing_url(&url)
        .with_bucket(false);
    let client = VixivClient::new(config).unwrap();

    let err = client
        .cell_volume(CellType::Fcc, 1.0, DVec3::splat(10.0))
        .await
        .unwrap_err();
    assert!(matches!(err, VixivError::Configuration(_)));
    assert_eq!(rec.hits(), 0);
}

// ============================================================================
// VOXELIZE
// ============================================================================

async fn voxelize_handler(State(rec): State<Shared>, multipart: Multipart) -> impl IntoResponse {
    rec.hits.fetch_add(1, Ordering::SeqCst);
    record_multipart(&rec, multipart).await;
    binary_ok(b"packed-blob".to_vec())
}

#[tokio::test]
async fn test_invalid_mesh_inputs_send_nothing() {
    let rec: Shared = Arc::default();
    let app = Router::new()
        .route("/v1/voxelize", post(voxelize_handler))
        .with_state(rec.clone());
    let url = spawn(app).await;
    let client = VixivClient::new(config(&url, &url)).unwrap();
    let dir = tempfile::tempdir().unwrap();

    let obj = write_file(dir.path(), "part.obj", b"v 0 0 0");
    let err = client.voxelize(&obj, &PackOptions::default()).await.unwrap_err();
    assert!(matches!(err, VixivError::UnsupportedFormat { .. }));

    let missing = dir.path().join("missing.stl");
    let err = client
        .voxelize(&missing, &PackOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, VixivError::FileNotFound(_)));

    let err = client
        .mesh_voxels(&obj, &VoxelSampling::default())
        .await
        .unwrap_err();
    assert!(matches!(err, VixivError::UnsupportedFormat { .. }));

    assert_eq!(rec.hits(), 0);
}

#[tokio::test]
async fn test_voxelize_sends_file_inline() {
    let rec: Shared = Arc::default();
    let app = Router::new()
        .route("/v1/voxelize", post(voxelize_handler))
        .with_state(rec.clone());
    let url = spawn(app).await;
    let client = VixivClient::new(config(&url, &url)).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let stl = write_file(dir.path(), "part.STL", b"solid part\nendsolid part\n");

    let options = PackOptions {
        cell_size: DVec3::new(40.0, 40.0, 20.5),
        ..PackOptions::default()
    };
    let out = dir.path().join("nested").join("part.vox");
    client.voxelize_to_file(&stl, &options, &out).await.unwrap();

    assert_eq!(std::fs::read(&out).unwrap(), b"packed-blob");
    assert_eq!(
        rec.file.lock().unwrap().as_deref(),
        Some(&b"solid part\nendsolid part\n"[..])
    );
    assert_eq!(rec.field("cell_size").as_deref(), Some("40,40,20.5"));
    assert_eq!(rec.field("device").as_deref(), Some("cpu"));
    assert_eq!(rec.field("force_dir").as_deref(), Some("0,0,1"));
}

// ============================================================================
// PACKING CONSUMERS AND STAGING
// ============================================================================

#[tokio::test]
async fn test_visualization_data_derives_partial_centers() {
    let app = Router::new().route(
        "/v1/visualization-data",
        post(|_multipart: Multipart| async { binary_ok(layout_npz()) }),
    );
    let url = spawn(app).await;
    let staging = tempfile::tempdir().unwrap();
    let client =
        VixivClient::new(config(&url, &url).with_staging_dir(staging.path())).unwrap();

    let blob = b"opaque packing".to_vec();
    let data = client
        .visualization_data(PackingSource::from(&blob))
        .await
        .unwrap();

    assert_eq!(data.cell_size, DVec3::splat(10.0));
    assert_eq!(data.cell_centers, vec![DVec3::ZERO]);
    assert_eq!(
        data.partial_centers,
        vec![DVec3::ZERO, DVec3::new(10.0, 0.0, 0.0)]
    );
    assert!(dir_is_empty(staging.path()));
}

#[tokio::test]
async fn test_generate_mesh_decodes_archive() {
    let rec: Shared = Arc::default();
    let app = Router::new()
        .route(
            "/v1/generate-mesh",
            post(|State(rec): State<Shared>, multipart: Multipart| async move {
                record_multipart(&rec, multipart).await;
                binary_ok(tetrahedron_npz())
            }),
        )
        .with_state(rec.clone());
    let url = spawn(app).await;
    let staging = tempfile::tempdir().unwrap();
    let client =
        VixivClient::new(config(&url, &url).with_staging_dir(staging.path())).unwrap();

    let options = MeshOptions {
        cell_type: CellType::Bcc,
        ..MeshOptions::default()
    };
    let blob = b"opaque packing".to_vec();
    let mesh = client
        .generate_mesh(PackingSource::from(&blob), &options)
        .await
        .unwrap();

    assert_eq!(mesh.vertices().len(), 4);
    assert_eq!(mesh.faces().len(), 4);
    assert_eq!(rec.field("cell_type").as_deref(), Some("bcc"));
    assert_eq!(rec.field("beam_diameter").as_deref(), Some("2"));
    assert_eq!(rec.field("clear_dir"), None);
    assert_eq!(
        rec.file.lock().unwrap().as_deref(),
        Some(&b"opaque packing"[..])
    );
    assert!(dir_is_empty(staging.path()));
}

#[tokio::test]
async fn test_staging_cleaned_after_application_failure() {
    let app = Router::new().route(
        "/v1/generate-mesh",
        post(|_multipart: Multipart| async {
            (
                StatusCode::OK,
                [("success", "false"), ("error", "no cells"), ("traceback", "tb")],
                Vec::<u8>::new(),
            )
        }),
    );
    let url = spawn(app).await;
    let staging = tempfile::tempdir().unwrap();
    let client =
        VixivClient::new(config(&url, &url).with_staging_dir(staging.path())).unwrap();

    let blob = b"opaque packing".to_vec();
    let err = client
        .generate_mesh(PackingSource::from(&blob), &MeshOptions::default())
        .await
        .unwrap_err();
    match err {
        VixivError::Application { message, traceback } => {
            assert_eq!(message, "no cells");
            assert_eq!(traceback.as_deref(), Some("tb"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(dir_is_empty(staging.path()));
}

#[tokio::test]
async fn test_staging_cleaned_after_server_error() {
    let app = Router::new().route(
        "/v1/visualization-data",
        post(|_multipart: Multipart| async { StatusCode::INTERNAL_SERVER_ERROR }),
    );
    let url = spawn(app).await;
    let staging = tempfile::tempdir().unwrap();
    let client =
        VixivClient::new(config(&url, &url).with_staging_dir(staging.path())).unwrap();

    let blob = b"opaque packing".to_vec();
    let err = client
        .visualization_data(PackingSource::from(&blob))
        .await
        .unwrap_err();
    assert!(matches!(err, VixivError::Request { status: 500, .. }));
    assert!(dir_is_empty(staging.path()));
}

// ============================================================================
// JSON OPERATIONS
// ============================================================================

#[tokio::test]
async fn test_mesh_voxels_decodes_arrays() {
    let app = Router::new().route(
        "/v1/mesh-voxels",
        post(|_multipart: Multipart| async {
            Json(json!({
                "success": true,
                "result": {
                    "location_table": [[0, 1], [1, 0]],
                    "offsets": [0.0, 0.5, 0.0],
                    "cell_centers": [[1.0, 2.0, 3.0]]
                }
            }))
        }),
    );
    let url = spawn(app).await;
    let client = VixivClient::new(config(&url, &url)).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let stl = write_file(dir.path(), "part.stl", b"solid\nendsolid\n");

    let voxels = client
        .mesh_voxels(&stl, &VoxelSampling::default())
        .await
        .unwrap();
    assert_eq!(voxels.location_table.shape(), &[2, 2]);
    assert_eq!(voxels.offsets.shape(), &[3]);
    assert_eq!(
        voxels.cell_centers.to_points().unwrap(),
        vec![DVec3::new(1.0, 2.0, 3.0)]
    );
}

#[tokio::test]
async fn test_voxel_centers_returns_rotation() {
    let app = Router::new().route(
        "/v1/voxel-centers",
        post(|Json(body): Json<Value>| async move {
            Json(json!({
                "success": true,
                "result": {"centers": body["cell_centers"].clone(), "angle": 0.25}
            }))
        }),
    );
    let url = spawn(app).await;
    let client = VixivClient::new(config(&url, &url)).unwrap();

    let centers = [DVec3::new(1.0, 0.0, 0.0), DVec3::new(0.0, 2.0, 0.0)];
    let rotated = client
        .voxel_centers(&centers, DVec3::Z, DVec3::ZERO)
        .await
        .unwrap();
    assert_eq!(rotated.centers, centers.to_vec());
    assert_eq!(rotated.angle, 0.25);
}

#[tokio::test]
async fn test_generate_shader_writes_file() {
    let app = Router::new().route(
        "/v1/generate-shader",
        post(|| async {
            Json(json!({"success": true, "result": {"shader_content": "void main() {}"}}))
        }),
    );
    let url = spawn(app).await;
    let client = VixivClient::new(config(&url, &url)).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("shaders").join("lattice.frag");

    let request = ShaderRequest::new(CellType::Fcc, DVec3::splat(10.0), 1.0, &[DVec3::ZERO]);
    client.generate_shader(&request, &out).await.unwrap();
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "void main() {}");
}

// ============================================================================
// BUCKET TRANSPORT
// ============================================================================

fn storage_app(granted: bool, upload_status: StatusCode, uploads: Shared) -> Router {
    Router::new()
        .route(
            "/storage/v1/b/vixiv-incoming/iam/testPermissions",
            get(move || async move {
                if granted {
                    Json(json!({"permissions": ["storage.objects.create"]})).into_response()
                } else {
                    StatusCode::FORBIDDEN.into_response()
                }
            }),
        )
        .route(
            "/upload/storage/v1/b/vixiv-incoming/o",
            post(
                move |State(rec): State<Shared>,
                 Query(query): Query<HashMap<String, String>>,
                 body: Bytes| async move {
                    rec.hits.fetch_add(1, Ordering::SeqCst);
                    rec.fields.lock().unwrap().extend(query);
                    *rec.file.lock().unwrap() = Some(body.to_vec());
                    (upload_status, Json(json!({"kind": "storage#object"})))
                },
            ),
        )
        .with_state(uploads)
}

#[tokio::test]
async fn test_bucket_upload_replaces_inline_file() {
    let uploads: Shared = Arc::default();
    let storage = spawn(storage_app(true, StatusCode::OK, uploads.clone())).await;

    let rec: Shared = Arc::default();
    let app = Router::new()
        .route(
            "/v1/voxelize",
            post(
                |State(rec): State<Shared>, Form(form): Form<HashMap<String, String>>| async move {
                    rec.hits.fetch_add(1, Ordering::SeqCst);
                    rec.fields.lock().unwrap().extend(form);
                    binary_ok(b"packed-blob".to_vec())
                },
            ),
        )
        .with_state(rec.clone());
    let url = spawn(app).await;

    let config = config(&url, &url)
        .with_bucket(true)
        .with_storage_endpoint(&storage);
    let client = VixivClient::new(config).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let stl = write_file(dir.path(), "part.stl", b"solid\nendsolid\n");

    let blob = client.voxelize(&stl, &PackOptions::default()).await.unwrap();
    assert_eq!(blob, b"packed-blob");

    assert_eq!(uploads.hits(), 1);
    let object = uploads.field("name").unwrap();
    assert!(object.starts_with("incoming/"));
    assert!(object.ends_with(".stl"));
    assert_eq!(
        uploads.file.lock().unwrap().as_deref(),
        Some(&b"solid\nendsolid\n"[..])
    );

    let mesh_url = rec.field("mesh_url").unwrap();
    assert_eq!(mesh_url, format!("gs://vixiv-incoming/{}", object));
    assert_eq!(rec.field("cell_size").as_deref(), Some("40,40,40"));
}

#[tokio::test]
async fn test_denied_permission_falls_back_to_inline() {
    let uploads: Shared = Arc::default();
    let storage = spawn(storage_app(false, StatusCode::OK, uploads.clone())).await;

    let rec: Shared = Arc::default();
    let app = Router::new()
        .route("/v1/voxelize", post(voxelize_handler))
        .with_state(rec.clone());
    let url = spawn(app).await;

    let config = config(&url, &url)
        .with_bucket(true)
        .with_storage_endpoint(&storage);
    let client = VixivClient::new(config).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let stl = write_file(dir.path(), "part.stl", b"solid\nendsolid\n");

    client.voxelize(&stl, &PackOptions::default()).await.unwrap();

    assert_eq!(uploads.hits(), 0);
    assert_eq!(rec.hits(), 1);
    assert!(rec.file.lock().unwrap().is_some());
    assert_eq!(rec.field("mesh_url"), None);
}

#[tokio::test]
async fn test_unreachable_storage_falls_back_to_inline() {
    // Bind and release a port so nothing listens on it
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let storage = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let rec: Shared = Arc::default();
    let app = Router::new()
        .route("/v1/voxelize", post(voxelize_handler))
        .with_state(rec.clone());
    let url = spawn(app).await;

    let config = config(&url, &url)
        .with_bucket(true)
        .with_storage_endpoint(&storage);
    let client = VixivClient::new(config).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let stl = write_file(dir.path(), "part.stl", b"solid\nendsolid\n");

    let blob = client.voxelize(&stl, &PackOptions::default()).await.unwrap();
    assert_eq!(blob, b"packed-blob");
    assert_eq!(rec.hits(), 1);
    assert_eq!(
        rec.file.lock().unwrap().as_deref(),
        Some(&b"solid\nendsolid\n"[..])
    );
    assert_eq!(rec.field("mesh_url"), None);
}

#[tokio::test]
async fn test_rejected_upload_is_storage_error_without_inline_retry() {
    let uploads: Shared = Arc::default();
    let storage = spawn(storage_app(
        true,
        StatusCode::INTERNAL_SERVER_ERROR,
        uploads.clone(),
    ))
    .await;

    let rec: Shared = Arc::default();
    let app = Router::new()
        .fallback(|State(rec): State<Shared>| async move {
            rec.hits.fetch_add(1, Ordering::SeqCst);
            StatusCode::OK
        })
        .with_state(rec.clone());
    let url = spawn(app).await;

    let config = config(&url, &url)
        .with_bucket(true)
        .with_storage_endpoint(&storage);
    let client = VixivClient::new(config).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let stl = write_file(dir.path(), "part.stl", b"solid\nendsolid\n");

    let err = client
        .voxelize(&stl, &PackOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, VixivError::Storage(_)));
    assert_eq!(uploads.hits(), 1);
    assert_eq!(rec.hits(), 0);
}

#[tokio::test]
async fn test_packing_bytes_travel_as_results_url() {
    let uploads: Shared = Arc::default();
    let storage = spawn(storage_app(true, StatusCode::OK, uploads.clone())).await;

    let rec: Shared = Arc::default();
    let app = Router::new()
        .route(
            "/v1/generate-mesh",
            post(
                |State(rec): State<Shared>, Form(form): Form<HashMap<String, String>>| async move {
                    rec.hits.fetch_add(1, Ordering::SeqCst);
                    rec.fields.lock().unwrap().extend(form);
                    binary_ok(tetrahedron_npz())
                },
            ),
        )
        .with_state(rec.clone());
    let url = spawn(app).await;
    let staging = tempfile::tempdir().unwrap();

    let config = config(&url, &url)
        .with_bucket(true)
        .with_storage_endpoint(&storage)
        .with_staging_dir(staging.path());
    let client = VixivClient::new(config).unwrap();

    let blob = b"opaque packing".to_vec();
    let mesh = client
        .generate_mesh(PackingSource::from(&blob), &MeshOptions::default())
        .await
        .unwrap();
    assert_eq!(mesh.faces().len(), 4);

    assert_eq!(uploads.hits(), 1);
    assert_eq!(
        uploads.file.lock().unwrap().as_deref(),
        Some(&b"opaque packing"[..])
    );

    let results_url = rec.field("results_url").unwrap();
    let id = results_url
        .strip_prefix("gs://vixiv-incoming/incoming/")
        .and_then(|rest| rest.strip_suffix(".vox"))
        .unwrap();
    assert_eq!(id.len(), 32);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(rec.field("cell_type").as_deref(), Some("fcc"));
    assert!(dir_is_empty(staging.path()));
}

// ============================================================================
// LOCAL GEOMETRY
// ============================================================================

#[tokio::test]
async fn test_mesh_center_is_local() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tet.stl");
    let mesh = TriangleMesh::new(
        vec![
            DVec3::ZERO,
            DVec3::new(4.0, 0.0, 0.0),
            DVec3::new(0.0, 4.0, 0.0),
            DVec3::new(0.0, 0.0, 4.0),
        ],
        vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]],
    )
    .unwrap();
    mesh.export_stl(&path).unwrap();

    // No backend URLs at all
    let client = VixivClient::new(ClientConfig::new("test-key").with_bucket(false)).unwrap();
    let center = client.mesh_center(&path).unwrap();
    assert!((center - DVec3::splat(1.0)).length() < 1e-6);
}
