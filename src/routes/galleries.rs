use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::Response,
    routing::{delete, get, post},
    Json, Router,
};
use rand::Rng;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::archive::{archive_file_name, stream_gallery_archive, ArchiveEntry};
use crate::auth::{AppState, CurrentUser};
use crate::constants::{ARCHIVE_PIPE_BUFFER, MAX_UPLOAD_BODY_BYTES};
use crate::database::{execute_query, fetch_all, fetch_one, insert_returning_id, queries, DbConn};
use crate::error::{AppError, AppResult};
use crate::media_host::classify_media;
use crate::models::{
    GalleryCreateRequest, GalleryDeleteResponse, GalleryResponse, MediaDeleteRequest,
    MediaItemResponse, PublicGalleryResponse, UploadResponse,
};

const SECRET_LINK_LENGTH: usize = 22;
const EMPTY_GALLERY_MESSAGE: &str = "Gallery not found or has no images.";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/galleries", post(create_gallery).get(list_galleries))
        .route("/galleries/public/:secret_link", get(get_public_gallery))
        .route(
            "/galleries/public/:secret_link/download",
            get(download_gallery_archive),
        )
        .route(
            "/galleries/:id",
            delete(delete_gallery),
        )
        .route(
            "/galleries/:id/media",
            post(upload_media)
                .delete(delete_media)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BODY_BYTES)),
        )
}

struct GalleryRow {
    id: i64,
    user_id: i64,
    title: String,
    client_name: Option<String>,
    secret_link: String,
    created_at: String,
    updated_at: String,
}

struct MediaRow {
    id: i64,
    url: String,
    public_id: String,
    file_name: String,
    media_type: String,
}

fn map_gallery_row(row: &rusqlite::Row) -> rusqlite::Result<GalleryRow> {
    Ok(GalleryRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        client_name: row.get(3)?,
        secret_link: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn map_media_row(row: &rusqlite::Row) -> rusqlite::Result<MediaRow> {
    Ok(MediaRow {
        id: row.get(0)?,
        url: row.get(1)?,
        public_id: row.get(2)?,
        file_name: row.get(3)?,
        media_type: row.get(4)?,
    })
}

fn media_responses(conn: &DbConn, gallery_id: i64) -> AppResult<Vec<MediaItemResponse>> {
    let rows = fetch_all(
        conn,
        queries::media::SELECT_FOR_GALLERY,
        &[&gallery_id],
        map_media_row,
    )?;

    Ok(rows
        .into_iter()
        .map(|m| MediaItemResponse {
            id: m.id,
            url: m.url,
            public_id: m.public_id,
            file_name: m.file_name,
            media_type: m.media_type,
        })
        .collect())
}

fn gallery_response(conn: &DbConn, gallery: GalleryRow) -> AppResult<GalleryResponse> {
    let media = media_responses(conn, gallery.id)?;
    Ok(GalleryResponse {
        id: gallery.id,
        title: gallery.title,
        client_name: gallery.client_name,
        secret_link: gallery.secret_link,
        media,
        created_at: gallery.created_at,
        updated_at: gallery.updated_at,
    })
}

fn require_owned_gallery(conn: &DbConn, gallery_id: i64, user_id: i64) -> AppResult<GalleryRow> {
    let gallery = fetch_one(
        conn,
        queries::galleries::SELECT_BY_ID,
        &[&gallery_id],
        map_gallery_row,
    )?
    .ok_or_else(|| AppError::NotFound("Gallery not found".to_string()))?;

    if gallery.user_id != user_id {
        return Err(AppError::Authorization(
            "Not authorized to modify this gallery".to_string(),
        ));
    }

    Ok(gallery)
}

fn generate_secret_link() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(SECRET_LINK_LENGTH)
        .map(char::from)
        .collect()
}

async fn create_gallery(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<GalleryCreateRequest>,
) -> AppResult<(StatusCode, Json<GalleryResponse>)> {
    let title = request.title.trim();
    if title.chars().count() < 3 {
        return Err(AppError::Validation(
            "Gallery title must be at least 3 characters long".to_string(),
        ));
    }

    let conn = state.pool.get().map_err(AppError::Pool)?;
    let secret_link = generate_secret_link();

    let gallery_id = insert_returning_id(
        &conn,
        queries::galleries::INSERT,
        &[&current_user.id, &title, &request.client_name, &secret_link],
    )?;

    let gallery = fetch_one(
        &conn,
        queries::galleries::SELECT_BY_ID,
        &[&gallery_id],
        map_gallery_row,
    )?
    .ok_or_else(|| AppError::Internal("Failed to create gallery".to_string()))?;

    Ok((StatusCode::CREATED, Json(gallery_response(&conn, gallery)?)))
}

async fn list_galleries(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> AppResult<Json<Vec<GalleryResponse>>> {
    let conn = state.pool.get().map_err(AppError::Pool)?;

    let rows = fetch_all(
        &conn,
        queries::galleries::SELECT_FOR_USER,
        &[&current_user.id],
        map_gallery_row,
    )?;

    let mut galleries = Vec::with_capacity(rows.len());
    for row in rows {
        galleries.push(gallery_response(&conn, row)?);
    }

    Ok(Json(galleries))
}

async fn get_public_gallery(
    State(state): State<AppState>,
    Path(secret_link): Path<String>,
) -> AppResult<Json<PublicGalleryResponse>> {
    let conn = state.pool.get().map_err(AppError::Pool)?;

    let gallery = fetch_one(
        &conn,
        queries::galleries::SELECT_BY_SECRET_LINK,
        &[&secret_link],
        map_gallery_row,
    )?
    .ok_or_else(|| AppError::NotFound("Gallery not found".to_string()))?;

    let media = media_responses(&conn, gallery.id)?;

    Ok(Json(PublicGalleryResponse {
        title: gallery.title,
        client_name: gallery.client_name,
        media,
    }))
}

/// Bulk download: streams the gallery as one ZIP archive.
///
/// The media list is snapshotted before the first byte goes out; entries are
/// fetched one at a time, in gallery order, and failures become placeholder
/// entries rather than aborting the response. Once streaming starts, errors
/// can only surface as a truncated body.
async fn download_gallery_archive(
    State(state): State<AppState>,
    Path(secret_link): Path<String>,
) -> AppResult<Response> {
    let conn = state.pool.get().map_err(AppError::Pool)?;

    let gallery = fetch_one(
        &conn,
        queries::galleries::SELECT_BY_SECRET_LINK,
        &[&secret_link],
        map_gallery_row,
    )?
    .ok_or_else(|| AppError::NotFound(EMPTY_GALLERY_MESSAGE.to_string()))?;

    let media = fetch_all(
        &conn,
        queries::media::SELECT_FOR_GALLERY,
        &[&gallery.id],
        map_media_row,
    )?;
    drop(conn);

    if media.is_empty() {
        return Err(AppError::NotFound(EMPTY_GALLERY_MESSAGE.to_string()));
    }

    let entries: Vec<ArchiveEntry> = media
        .into_iter()
        .map(|m| ArchiveEntry {
            url: m.url,
            file_name: m.file_name,
        })
        .collect();

    let name = archive_file_name(&gallery.title);
    let disposition = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        name.ascii,
        urlencoding::encode(&name.unicode)
    );

    let (writer, reader) = tokio::io::duplex(ARCHIVE_PIPE_BUFFER);
    let fetcher = state.fetcher.clone();
    let gallery_id = gallery.id;
    let entry_count = entries.len();

    tokio::spawn(async move {
        match stream_gallery_archive(entries, fetcher.as_ref(), writer).await {
            Ok(summary) => info!(
                "gallery {} archive finished: {}/{} entries archived, {} placeholders",
                gallery_id,
                summary.archived(),
                entry_count,
                summary.failed()
            ),
            Err(err) => warn!("gallery {} archive aborted: {}", gallery_id, err),
        }
    });

    let body = Body::from_stream(ReaderStream::new(reader));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(header::CONTENT_DISPOSITION, disposition)
        .body(body)
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}

async fn upload_media(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(gallery_id): Path<i64>,
    mut multipart: Multipart,
) -> AppResult<Json<UploadResponse>> {
    let conn = state.pool.get().map_err(AppError::Pool)?;
    let gallery = require_owned_gallery(&conn, gallery_id, current_user.id)?;

    let folder = format!("galleries/{}", gallery.id);
    let max_files = state.config.uploads.max_files_per_batch;

    let mut received = 0usize;
    let mut uploaded = 0usize;
    let mut failed = 0usize;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Malformed upload: {}", e)))?
    {
        let file_name = match field.file_name() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => continue,
        };

        received += 1;
        if received > max_files {
            return Err(AppError::BadRequest(format!(
                "Too many files: at most {} per upload",
                max_files
            )));
        }

        let declared_type = field.content_type().map(str::to_string);
        let kind = classify_media(declared_type.as_deref(), &file_name).ok_or_else(|| {
            AppError::BadRequest(format!(
                "Images and videos only: {} is not a supported file type",
                file_name
            ))
        })?;

        let content_type = declared_type.unwrap_or_else(|| {
            mime_guess::from_path(&file_name)
                .first_or_octet_stream()
                .to_string()
        });

        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Malformed upload: {}", e)))?;

        match state
            .media_host
            .upload(&folder, &file_name, &content_type, data)
            .await
        {
            Ok(blob) => {
                let position: i64 = fetch_one(
                    &conn,
                    queries::media::NEXT_POSITION,
                    &[&gallery.id],
                    |row| row.get(0),
                )?
                .unwrap_or(0);

                insert_returning_id(
                    &conn,
                    queries::media::INSERT,
                    &[
                        &gallery.id,
                        &blob.url,
                        &blob.public_id,
                        &file_name,
                        &kind.as_str(),
                        &position,
                    ],
                )?;
                uploaded += 1;
            }
            Err(err) => {
                // One bad upload never sinks the batch.
                warn!("upload of {} to media host failed: {}", file_name, err);
                failed += 1;
            }
        }
    }

    if received == 0 {
        return Err(AppError::BadRequest("No files were uploaded".to_string()));
    }

    execute_query(&conn, queries::galleries::TOUCH_UPDATED_AT, &[&gallery.id])?;

    let gallery = fetch_one(
        &conn,
        queries::galleries::SELECT_BY_ID,
        &[&gallery_id],
        map_gallery_row,
    )?
    .ok_or_else(|| AppError::NotFound("Gallery not found".to_string()))?;

    let response = gallery_response(&conn, gallery)?;

    Ok(Json(UploadResponse {
        message: format!("Uploaded {} files successfully", uploaded),
        uploaded,
        failed,
        gallery: response,
    }))
}

async fn delete_gallery(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(gallery_id): Path<i64>,
) -> AppResult<Json<GalleryDeleteResponse>> {
    let conn = state.pool.get().map_err(AppError::Pool)?;
    let gallery = require_owned_gallery(&conn, gallery_id, current_user.id)?;

    let media = fetch_all(
        &conn,
        queries::media::SELECT_FOR_GALLERY,
        &[&gallery.id],
        map_media_row,
    )?;

    // Remote cleanup is best-effort: a dead media host must never make
    // gallery deletion fail.
    for item in &media {
        if let Err(err) = state.media_host.delete_blob(&item.public_id).await {
            warn!("failed to delete remote blob {}: {}", item.public_id, err);
        }
    }

    let folder = format!("galleries/{}", gallery.id);
    if let Err(err) = state.media_host.delete_folder(&folder).await {
        warn!("failed to delete remote folder {}: {}", folder, err);
    }

    execute_query(&conn, queries::galleries::DELETE_BY_ID, &[&gallery.id])?;

    Ok(Json(GalleryDeleteResponse {
        id: gallery.id,
        message: "Gallery removed".to_string(),
    }))
}

async fn delete_media(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(gallery_id): Path<i64>,
    Json(request): Json<MediaDeleteRequest>,
) -> AppResult<Json<GalleryResponse>> {
    let conn = state.pool.get().map_err(AppError::Pool)?;
    let gallery = require_owned_gallery(&conn, gallery_id, current_user.id)?;

    let exists: Option<i64> = fetch_one(
        &conn,
        queries::media::SELECT_BY_PUBLIC_ID,
        &[&gallery.id, &request.public_id],
        |row| row.get(0),
    )?;

    if exists.is_none() {
        return Err(AppError::NotFound("Image not found in gallery".to_string()));
    }

    if let Err(err) = state.media_host.delete_blob(&request.public_id).await {
        warn!("failed to delete remote blob {}: {}", request.public_id, err);
    }

    execute_query(
        &conn,
        queries::media::DELETE_BY_PUBLIC_ID,
        &[&gallery.id, &request.public_id],
    )?;
    execute_query(&conn, queries::galleries::TOUCH_UPDATED_AT, &[&gallery.id])?;

    let gallery = fetch_one(
        &conn,
        queries::galleries::SELECT_BY_ID,
        &[&gallery_id],
        map_gallery_row,
    )?
    .ok_or_else(|| AppError::NotFound("Gallery not found".to_string()))?;

    Ok(Json(gallery_response(&conn, gallery)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        auth_header, create_test_gallery, create_test_media, create_test_server, create_test_user,
        register_and_login, TestContext,
    };
    use std::io::Read;

    fn read_archive(bytes: Vec<u8>) -> ::zip::ZipArchive<std::io::Cursor<Vec<u8>>> {
        ::zip::ZipArchive::new(std::io::Cursor::new(bytes)).expect("response should be a ZIP")
    }

    #[tokio::test]
    async fn download_unknown_token_is_404_with_message() {
        let ctx = TestContext::new();
        let server = create_test_server(&ctx);

        let response = server.get("/api/galleries/public/nope/download").await;

        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = response.json();
        assert_eq!(body["message"], "Gallery not found or has no images.");
    }

    #[tokio::test]
    async fn download_empty_gallery_is_404() {
        let ctx = TestContext::new();
        let user_id = create_test_user(&ctx.pool, "ansel", "ansel@example.com");
        create_test_gallery(&ctx.pool, user_id, "Empty Set", "emptytoken1");

        let server = create_test_server(&ctx);
        let response = server.get("/api/galleries/public/emptytoken1/download").await;

        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = response.json();
        assert_eq!(body["message"], "Gallery not found or has no images.");
    }

    #[tokio::test]
    async fn download_streams_all_entries_in_order() {
        let ctx = TestContext::new();
        let user_id = create_test_user(&ctx.pool, "ansel", "ansel@example.com");
        let gallery_id = create_test_gallery(&ctx.pool, user_id, "Wedding Day", "abc123");
        create_test_media(&ctx, gallery_id, "first.jpg", b"one".to_vec());
        create_test_media(&ctx, gallery_id, "second.jpg", b"two".to_vec());

        let server = create_test_server(&ctx);
        let response = server.get("/api/galleries/public/abc123/download").await;

        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("application/zip")
        );

        let disposition = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string();
        assert!(disposition.contains("attachment"));
        assert!(disposition.contains("filename=\"Wedding Day.zip\""));

        let mut archive = read_archive(response.as_bytes().to_vec());
        assert_eq!(archive.len(), 2);

        let mut first = archive.by_index(0).unwrap();
        assert_eq!(first.name(), "first.jpg");
        let mut content = Vec::new();
        first.read_to_end(&mut content).unwrap();
        assert_eq!(content, b"one");
        drop(first);

        let second = archive.by_index(1).unwrap();
        assert_eq!(second.name(), "second.jpg");
    }

    #[tokio::test]
    async fn download_substitutes_placeholder_for_failed_fetch() {
        let ctx = TestContext::new();
        let user_id = create_test_user(&ctx.pool, "ansel", "ansel@example.com");
        let gallery_id = create_test_gallery(&ctx.pool, user_id, "Wedding Day", "abc123");
        create_test_media(&ctx, gallery_id, "kept.jpg", b"kept".to_vec());

        // Registered in the database but never in the fake remote store, so
        // the fetch comes back 404.
        crate::test_utils::create_test_media_row(
            &ctx.pool,
            gallery_id,
            "missing.jpg",
            "https://media.test/galleries/1/missing.jpg",
        );

        let server = create_test_server(&ctx);
        let response = server.get("/api/galleries/public/abc123/download").await;

        assert_eq!(response.status_code(), StatusCode::OK);

        let mut archive = read_archive(response.as_bytes().to_vec());
        assert_eq!(archive.len(), 2);

        let names: Vec<String> = (0..2)
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["kept.jpg", "ERROR_missing.jpg.txt"]);

        let mut placeholder = archive.by_index(1).unwrap();
        let mut text = String::new();
        placeholder.read_to_string(&mut text).unwrap();
        assert!(text.contains("https://media.test/galleries/1/missing.jpg"));
    }

    #[tokio::test]
    async fn download_disposition_encodes_non_ascii_title() {
        let ctx = TestContext::new();
        let user_id = create_test_user(&ctx.pool, "ansel", "ansel@example.com");
        let gallery_id = create_test_gallery(&ctx.pool, user_id, "יום הולדת", "hebrewtoken");
        create_test_media(&ctx, gallery_id, "a.jpg", b"x".to_vec());

        let server = create_test_server(&ctx);
        let response = server.get("/api/galleries/public/hebrewtoken/download").await;

        assert_eq!(response.status_code(), StatusCode::OK);
        let disposition = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string();

        assert!(disposition.contains("filename*=UTF-8''"));
        assert!(disposition.contains("%D7%99%D7%95%D7%9D%20%D7%94%D7%95%D7%9C%D7%93%D7%AA.zip"));
        assert!(disposition.contains("filename=\"_________.zip\""));
    }

    #[tokio::test]
    async fn create_requires_three_character_title() {
        let ctx = TestContext::new();
        let server = create_test_server(&ctx);
        let token = register_and_login(&server, "ansel", "ansel@example.com").await;

        let (name, value) = auth_header(&token);
        let response = server
            .post("/api/galleries")
            .add_header(name, value)
            .json(&serde_json::json!({ "title": "ab" }))
            .await;

        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_and_list_galleries() {
        let ctx = TestContext::new();
        let server = create_test_server(&ctx);
        let token = register_and_login(&server, "ansel", "ansel@example.com").await;

        let (name, value) = auth_header(&token);
        let response = server
            .post("/api/galleries")
            .add_header(name, value)
            .json(&serde_json::json!({
                "title": "Wedding Day",
                "client_name": "The Does"
            }))
            .await;

        assert_eq!(response.status_code(), StatusCode::CREATED);
        let created: serde_json::Value = response.json();
        assert_eq!(created["title"], "Wedding Day");
        assert_eq!(created["client_name"], "The Does");
        let secret = created["secret_link"].as_str().unwrap();
        assert_eq!(secret.len(), SECRET_LINK_LENGTH);

        let (name, value) = auth_header(&token);
        let list: serde_json::Value = server
            .get("/api/galleries")
            .add_header(name, value)
            .await
            .json();
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_requires_authentication() {
        let ctx = TestContext::new();
        let server = create_test_server(&ctx);

        let response = server.get("/api/galleries").await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn public_view_returns_media_without_owner_details() {
        let ctx = TestContext::new();
        let user_id = create_test_user(&ctx.pool, "ansel", "ansel@example.com");
        let gallery_id = create_test_gallery(&ctx.pool, user_id, "Wedding Day", "abc123");
        create_test_media(&ctx, gallery_id, "first.jpg", b"one".to_vec());

        let server = create_test_server(&ctx);
        let response = server.get("/api/galleries/public/abc123").await;

        assert_eq!(response.status_code(), StatusCode::OK);
        let body: serde_json::Value = response.json();
        assert_eq!(body["title"], "Wedding Day");
        assert_eq!(body["media"].as_array().unwrap().len(), 1);
        assert!(body.get("secret_link").is_none());
    }

    #[tokio::test]
    async fn upload_rejects_foreign_gallery() {
        let ctx = TestContext::new();
        let other = create_test_user(&ctx.pool, "other", "other@example.com");
        let gallery_id = create_test_gallery(&ctx.pool, other, "Not Yours", "foreigntok");

        let server = create_test_server(&ctx);
        let token = register_and_login(&server, "ansel", "ansel@example.com").await;

        let form = axum_test::multipart::MultipartForm::new().add_part(
            "images",
            axum_test::multipart::Part::bytes(b"data".to_vec())
                .file_name("a.jpg")
                .mime_type("image/jpeg"),
        );

        let (name, value) = auth_header(&token);
        let response = server
            .post(&format!("/api/galleries/{}/media", gallery_id))
            .add_header(name, value)
            .multipart(form)
            .await;

        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn upload_stores_files_and_appends_media() {
        let ctx = TestContext::new();
        let server = create_test_server(&ctx);
        let token = register_and_login(&server, "ansel", "ansel@example.com").await;

        let (name, value) = auth_header(&token);
        let created: serde_json::Value = server
            .post("/api/galleries")
            .add_header(name, value)
            .json(&serde_json::json!({ "title": "Wedding Day" }))
            .await
            .json();
        let gallery_id = created["id"].as_i64().unwrap();

        let form = axum_test::multipart::MultipartForm::new()
            .add_part(
                "images",
                axum_test::multipart::Part::bytes(b"jpeg-bytes".to_vec())
                    .file_name("portrait.jpg")
                    .mime_type("image/jpeg"),
            )
            .add_part(
                "images",
                axum_test::multipart::Part::bytes(b"mp4-bytes".to_vec())
                    .file_name("dance.mp4")
                    .mime_type("video/mp4"),
            );

        let (name, value) = auth_header(&token);
        let response = server
            .post(&format!("/api/galleries/{}/media", gallery_id))
            .add_header(name, value)
            .multipart(form)
            .await;

        assert_eq!(response.status_code(), StatusCode::OK);
        let body: serde_json::Value = response.json();
        assert_eq!(body["uploaded"], 2);
        assert_eq!(body["failed"], 0);

        let media = body["gallery"]["media"].as_array().unwrap();
        assert_eq!(media.len(), 2);
        assert_eq!(media[0]["file_name"], "portrait.jpg");
        assert_eq!(media[0]["media_type"], "image");
        assert_eq!(media[1]["file_name"], "dance.mp4");
        assert_eq!(media[1]["media_type"], "video");
    }

    #[tokio::test]
    async fn upload_isolates_per_file_media_host_failures() {
        let ctx = TestContext::new();
        let server = create_test_server(&ctx);
        let token = register_and_login(&server, "ansel", "ansel@example.com").await;

        let (name, value) = auth_header(&token);
        let created: serde_json::Value = server
            .post("/api/galleries")
            .add_header(name, value)
            .json(&serde_json::json!({ "title": "Wedding Day" }))
            .await
            .json();
        let gallery_id = created["id"].as_i64().unwrap();

        ctx.media_host.fail_uploads_containing("cursed");

        let form = axum_test::multipart::MultipartForm::new()
            .add_part(
                "images",
                axum_test::multipart::Part::bytes(b"fine".to_vec())
                    .file_name("good.jpg")
                    .mime_type("image/jpeg"),
            )
            .add_part(
                "images",
                axum_test::multipart::Part::bytes(b"doomed".to_vec())
                    .file_name("cursed.jpg")
                    .mime_type("image/jpeg"),
            );

        let (name, value) = auth_header(&token);
        let response = server
            .post(&format!("/api/galleries/{}/media", gallery_id))
            .add_header(name, value)
            .multipart(form)
            .await;

        // The batch still succeeds; only the cursed file is dropped.
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: serde_json::Value = response.json();
        assert_eq!(body["uploaded"], 1);
        assert_eq!(body["failed"], 1);

        let media = body["gallery"]["media"].as_array().unwrap();
        assert_eq!(media.len(), 1);
        assert_eq!(media[0]["file_name"], "good.jpg");
    }

    #[tokio::test]
    async fn upload_rejects_unsupported_file_type() {
        let ctx = TestContext::new();
        let server = create_test_server(&ctx);
        let token = register_and_login(&server, "ansel", "ansel@example.com").await;

        let (name, value) = auth_header(&token);
        let created: serde_json::Value = server
            .post("/api/galleries")
            .add_header(name, value)
            .json(&serde_json::json!({ "title": "Wedding Day" }))
            .await
            .json();
        let gallery_id = created["id"].as_i64().unwrap();

        let form = axum_test::multipart::MultipartForm::new().add_part(
            "images",
            axum_test::multipart::Part::bytes(b"plain".to_vec())
                .file_name("notes.txt")
                .mime_type("text/plain"),
        );

        let (name, value) = auth_header(&token);
        let response = server
            .post(&format!("/api/galleries/{}/media", gallery_id))
            .add_header(name, value)
            .multipart(form)
            .await;

        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_media_removes_row_and_remote_blob() {
        let ctx = TestContext::new();
        let server = create_test_server(&ctx);
        let token = register_and_login(&server, "ansel", "ansel@example.com").await;

        let (name, value) = auth_header(&token);
        let created: serde_json::Value = server
            .post("/api/galleries")
            .add_header(name, value)
            .json(&serde_json::json!({ "title": "Wedding Day" }))
            .await
            .json();
        let gallery_id = created["id"].as_i64().unwrap();

        let public_id = create_test_media(&ctx, gallery_id, "gone.jpg", b"x".to_vec());

        let (name, value) = auth_header(&token);
        let response = server
            .delete(&format!("/api/galleries/{}/media", gallery_id))
            .add_header(name, value)
            .json(&serde_json::json!({ "public_id": public_id }))
            .await;

        assert_eq!(response.status_code(), StatusCode::OK);
        let body: serde_json::Value = response.json();
        assert_eq!(body["media"].as_array().unwrap().len(), 0);
        assert!(ctx.media_host.deleted_blobs().contains(&public_id));
    }

    #[tokio::test]
    async fn delete_gallery_cleans_up_remote_store() {
        let ctx = TestContext::new();
        let server = create_test_server(&ctx);
        let token = register_and_login(&server, "ansel", "ansel@example.com").await;

        let (name, value) = auth_header(&token);
        let created: serde_json::Value = server
            .post("/api/galleries")
            .add_header(name, value)
            .json(&serde_json::json!({ "title": "Wedding Day" }))
            .await
            .json();
        let gallery_id = created["id"].as_i64().unwrap();
        let public_id = create_test_media(&ctx, gallery_id, "a.jpg", b"x".to_vec());

        let (name, value) = auth_header(&token);
        let response = server
            .delete(&format!("/api/galleries/{}", gallery_id))
            .add_header(name, value)
            .await;

        assert_eq!(response.status_code(), StatusCode::OK);
        assert!(ctx.media_host.deleted_blobs().contains(&public_id));
        assert!(ctx
            .media_host
            .deleted_folders()
            .contains(&format!("galleries/{}", gallery_id)));

        let conn = ctx.pool.get().unwrap();
        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM gallery_media", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }
}
