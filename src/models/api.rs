use serde::{Deserialize, Serialize};

/// Upload-completion trigger. Accepts the flat shape or the storage event envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UploadEvent {
    #[serde(rename_all = "camelCase")]
    Flat { bucket_name: String, object_key: String },
    Envelope { detail: StorageEventDetail },
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageEventDetail {
    pub bucket: NamedBucket,
    pub object: StoredObject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedBucket {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoredObject {
    pub key: String,
}

impl UploadEvent {
    /// `(bucketName, objectKey)` regardless of shape
    pub fn into_parts(self) -> (String, String) {
        match self {
            UploadEvent::Flat { bucket_name, object_key } => (bucket_name, object_key),
            UploadEvent::Envelope { detail } => (detail.bucket.name, detail.object.key),
        }
    }
}

/// Run id encoded in an upload key (`.../{runId}/RAW.<ext>`)
pub fn run_id_from_key(object_key: &str) -> Option<&str> {
    let mut parts = object_key.rsplit('/');
    let file = parts.next()?;
    let run_id = parts.next()?;
    let (stem, ext) = file.rsplit_once('.')?;
    if stem != "RAW" || ext.is_empty() || run_id.is_empty() {
        return None;
    }
    Some(run_id)
}

/// Start the short generation pipeline for one highlight
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortRequest {
    /// JSON document with crop and section settings, passed as a string
    pub inputs: String,
    pub video_id: String,
    pub highlight: i32,
    pub question: String,
}

/// Worker-style envelope returned by trigger endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeResponse {
    pub status_code: u16,
    pub body: String,
}

impl EnvelopeResponse {
    pub fn success() -> Self {
        Self {
            status_code: 200,
            body: "success".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStarted {
    pub run_id: String,
    pub pipeline: String,
}
