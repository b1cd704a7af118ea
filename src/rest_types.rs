use std::{collections::BTreeMap, time::SystemTime};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::serde_utils;

/// Result of `b2_authorize_account`; every later call needs pieces of it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescriptor {
    pub authorization_token: String,
    pub api_url: Url,
    pub download_url: Url,
    pub minimum_part_size: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetFileInfoRequest<'a> {
    pub file_id: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub account_id: String,
    pub bucket_id: String,
    pub content_length: u64,
    pub content_sha1: String,
    pub content_type: String,
    pub file_id: String,
    pub file_info: BTreeMap<String, String>,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_timestamp: Option<Timestamp>,
}

impl FileInfo {
    /// Field name/value pairs in display order, with custom file info entries last.
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut entries = vec![
            ("accountId".to_string(), self.account_id.clone()),
            ("bucketId".to_string(), self.bucket_id.clone()),
            ("contentLength".to_string(), self.content_length.to_string()),
            ("contentSha1".to_string(), self.content_sha1.clone()),
            ("contentType".to_string(), self.content_type.clone()),
            ("fileId".to_string(), self.file_id.clone()),
            ("fileName".to_string(), self.file_name.clone()),
        ];
        if let Some(Timestamp(uploaded)) = self.upload_timestamp {
            entries.push((
                "uploadTimestamp".to_string(),
                humantime::format_rfc3339_millis(uploaded).to_string(),
            ));
        }
        entries.extend(
            self.file_info
                .iter()
                .map(|(key, value)| (format!("fileInfo.{key}"), value.clone())),
        );
        entries
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(pub SystemTime);

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let system_time = serde_utils::deserialize_timestamp_millis(deserializer)?;
        Ok(Timestamp(system_time))
    }
}

impl Serialize for Timestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serde_utils::serialize_timestamp_millis(&self.0, serializer)
    }
}

/// Body B2 sends along with any non-2xx status.
#[derive(Debug, Clone, Deserialize)]
pub struct B2ErrorBody {
    pub status: u16,
    pub code: String,
    pub message: String,
}
