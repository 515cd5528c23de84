use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct GalleryCreateRequest {
    pub title: String,
    pub client_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MediaItemResponse {
    pub id: i64,
    pub url: String,
    pub public_id: String,
    pub file_name: String,
    pub media_type: String,
}

#[derive(Debug, Serialize)]
pub struct GalleryResponse {
    pub id: i64,
    pub title: String,
    pub client_name: Option<String>,
    pub secret_link: String,
    pub media: Vec<MediaItemResponse>,
    pub created_at: String,
    pub updated_at: String,
}

/// Gallery view served to share-link visitors. Carries no owner or link
/// metadata beyond what the client page needs.
#[derive(Debug, Serialize)]
pub struct PublicGalleryResponse {
    pub title: String,
    pub client_name: Option<String>,
    pub media: Vec<MediaItemResponse>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub uploaded: usize,
    pub failed: usize,
    pub gallery: GalleryResponse,
}

#[derive(Debug, Deserialize)]
pub struct MediaDeleteRequest {
    pub public_id: String,
}

#[derive(Debug, Serialize)]
pub struct GalleryDeleteResponse {
    pub id: i64,
    pub message: String,
}
