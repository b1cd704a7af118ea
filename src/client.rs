use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use base64::{Engine, prelude::BASE64_STANDARD};
use reqwest::{Client, Response, StatusCode, header::AUTHORIZATION};
use tracing::{debug, info};
use url::Url;

use crate::download::Download;
use crate::error::B2Error;
use crate::rest_types::{B2ErrorBody, FileInfo, GetFileInfoRequest, SessionDescriptor};

pub const DEFAULT_AUTHORIZE_URL: &str =
    "https://api.backblazeb2.com/b2api/v1/b2_authorize_account";

const GET_FILE_INFO_ROUTE: &str = "b2api/v1/b2_get_file_info";
const DOWNLOAD_FILE_BY_ID_ROUTE: &str = "b2api/v1/b2_download_file_by_id";
const DOWNLOAD_FILE_BY_NAME_SEGMENT: &str = "file";

const GET_FILE_INFO_OPERATION: &str = "b2_get_file_info";

/// Value for the `Authorization` header of `b2_authorize_account`.
pub fn basic_auth_header(account_id: &str, application_key: &str) -> String {
    let id_and_key = format!("{account_id}:{application_key}");
    format!("Basic {}", BASE64_STANDARD.encode(id_and_key))
}

/// Appends `route` to `base`, whether or not `base` ends with a slash.
fn endpoint(base: &Url, route: &str) -> Result<Url, url::ParseError> {
    let base = base.as_str().trim_end_matches('/');
    Url::parse(&format!("{base}/{route}"))
}

fn download_by_name_url(
    download_url: &Url,
    bucket_name: &str,
    file_name: &str,
    local_path: &Path,
) -> Result<Url, B2Error> {
    let mut url = download_url.clone();
    url.path_segments_mut()
        .map_err(|_| B2Error::Download {
            target: local_path.to_path_buf(),
            reason: format!("invalid download URL {download_url}"),
            source: None,
        })?
        .pop_if_empty()
        .push(DOWNLOAD_FILE_BY_NAME_SEGMENT)
        .push(bucket_name)
        .extend(file_name.split('/'));
    Ok(url)
}

/// Describes a non-2xx response, preferring the B2 error body when there is one.
pub(crate) async fn failure_reason(response: Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<B2ErrorBody>(&text) {
        Ok(body) => format!("{} ({}): {}", body.status, body.code, body.message),
        Err(_) if text.is_empty() => status.to_string(),
        Err(_) => format!("{status} - {text}"),
    }
}

pub struct B2Client {
    client: Client,
    authorize_url: Url,
}

impl B2Client {
    pub fn new(authorize_url: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            authorize_url,
        })
    }

    pub async fn authorize(
        &self,
        account_id: &str,
        application_key: &str,
    ) -> Result<SessionDescriptor, B2Error> {
        if account_id.is_empty() || application_key.is_empty() {
            return Err(B2Error::Argument(
                "Account ID and application key must not be empty".to_string(),
            ));
        }

        debug!(url = %self.authorize_url, "Authorizing B2 account");
        let response = self
            .client
            .get(self.authorize_url.clone())
            .header(AUTHORIZATION, basic_auth_header(account_id, application_key))
            .send()
            .await
            .map_err(|e| B2Error::auth("request failed", e))?;

        if response.status() != StatusCode::OK {
            return Err(B2Error::Auth {
                reason: failure_reason(response).await,
                source: None,
            });
        }

        let session: SessionDescriptor = response
            .json()
            .await
            .map_err(|e| B2Error::auth("malformed authorization response", e))?;

        if session.authorization_token.is_empty() {
            return Err(B2Error::Auth {
                reason: "no authorization token in response".to_string(),
                source: None,
            });
        }

        info!(api_url = %session.api_url, download_url = %session.download_url, "Authorized B2 account");
        Ok(session)
    }

    pub async fn get_file_info(
        &self,
        api_url: &Url,
        file_id: &str,
        auth_token: &str,
    ) -> Result<FileInfo, B2Error> {
        let url = endpoint(api_url, GET_FILE_INFO_ROUTE)
            .map_err(|e| B2Error::api(GET_FILE_INFO_OPERATION, "invalid API URL", e))?;

        debug!(%url, file_id, "Fetching file info");
        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, auth_token)
            .json(&GetFileInfoRequest { file_id })
            .send()
            .await
            .map_err(|e| B2Error::api(GET_FILE_INFO_OPERATION, "request failed", e))?;

        if response.status() != StatusCode::OK {
            return Err(B2Error::Api {
                operation: GET_FILE_INFO_OPERATION,
                reason: failure_reason(response).await,
                source: None,
            });
        }

        let file_info: FileInfo = response.json().await.map_err(|e| {
            B2Error::api(GET_FILE_INFO_OPERATION, "malformed file info response", e)
        })?;

        info!(file_id, file_name = %file_info.file_name, "Fetched file info");
        Ok(file_info)
    }

    pub fn download_by_id<'a>(
        &'a self,
        auth_token: &str,
        download_url: &Url,
        file_id: &str,
        local_path: &'a Path,
    ) -> Download<'a> {
        let request = endpoint(download_url, DOWNLOAD_FILE_BY_ID_ROUTE)
            .map_err(|e| B2Error::download(local_path, "invalid download URL", e))
            .map(|url| {
                debug!(%url, file_id, "Downloading file by ID");
                self.client
                    .get(url)
                    .header(AUTHORIZATION, auth_token)
                    .query(&[("fileId", file_id)])
            });

        Download::new(request, local_path)
    }

    pub fn download_by_name<'a>(
        &'a self,
        auth_token: &str,
        download_url: &Url,
        bucket_name: &str,
        file_name: &str,
        local_path: &'a Path,
    ) -> Download<'a> {
        let request = download_by_name_url(download_url, bucket_name, file_name, local_path)
            .map(|url| {
                debug!(%url, "Downloading file by name");
                self.client.get(url).header(AUTHORIZATION, auth_token)
            });

        Download::new(request, local_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest_types::Timestamp;
    use mockito::Matcher;
    use std::{
        collections::BTreeMap,
        fs,
        io::{self, Write},
        time::{Duration, UNIX_EPOCH},
    };
    use tempfile::TempDir;

    const TOKEN: &str = "3_20160409004829_42b8f80ba60fb4323dcaad98_ec81302316fccc2260201cbf17813247f312cf3b_000_uplg";

    fn client_for(server: &mockito::ServerGuard) -> B2Client {
        let authorize_url =
            Url::parse(&format!("{}/b2api/v1/b2_authorize_account", server.url())).unwrap();
        B2Client::new(authorize_url, Duration::from_secs(5)).unwrap()
    }

    fn server_url(server: &mockito::ServerGuard) -> Url {
        Url::parse(&server.url()).unwrap()
    }

    #[test]
    fn basic_auth_header_encodes_id_and_key() {
        assert_eq!(basic_auth_header("test", "test"), "Basic dGVzdDp0ZXN0");
    }

    #[test]
    fn endpoint_handles_trailing_slash() {
        let with = Url::parse("https://api001.backblazeb2.com/").unwrap();
        let without = Url::parse("https://api001.backblazeb2.com").unwrap();

        assert_eq!(
            endpoint(&with, GET_FILE_INFO_ROUTE).unwrap().as_str(),
            "https://api001.backblazeb2.com/b2api/v1/b2_get_file_info"
        );
        assert_eq!(endpoint(&with, GET_FILE_INFO_ROUTE), endpoint(&without, GET_FILE_INFO_ROUTE));
    }

    #[test]
    fn download_by_name_url_encodes_segments() {
        let base = Url::parse("https://f001.backblazeb2.com").unwrap();

        let url = download_by_name_url(
            &base,
            "my-bucket",
            "photos/After gym.jpg",
            Path::new("out.jpg"),
        )
        .unwrap();

        assert_eq!(
            url.as_str(),
            "https://f001.backblazeb2.com/file/my-bucket/photos/After%20gym.jpg"
        );
    }

    #[tokio::test]
    async fn authorize_returns_session_descriptor() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "accountId": "YOUR_ACCOUNT_ID",
            "apiUrl": "https://api001.backblazeb2.com",
            "authorizationToken": TOKEN,
            "downloadUrl": "https://f001.backblazeb2.com",
            "minimumPartSize": 100000000
        });
        let mock = server
            .mock("GET", "/b2api/v1/b2_authorize_account")
            .match_header("authorization", "Basic YWNjb3VudDprZXk=")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let session = client_for(&server).authorize("account", "key").await.unwrap();

        mock.assert_async().await;
        assert_eq!(session.authorization_token, TOKEN);
        assert_eq!(session.api_url.as_str(), "https://api001.backblazeb2.com/");
        assert_eq!(session.download_url.as_str(), "https://f001.backblazeb2.com/");
        assert_eq!(session.minimum_part_size, 100000000);
    }

    #[tokio::test]
    async fn authorize_rejected_credentials_is_auth_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/b2api/v1/b2_authorize_account")
            .with_status(401)
            .with_body(
                r#"{"status": 401, "code": "unauthorized", "message": "invalid application key"}"#,
            )
            .create_async()
            .await;

        let err = client_for(&server)
            .authorize("account", "wrong")
            .await
            .unwrap_err();

        match err {
            B2Error::Auth { reason, .. } => {
                assert_eq!(reason, "401 (unauthorized): invalid application key")
            }
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn authorize_with_empty_key_makes_no_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let err = client_for(&server).authorize("account", "").await.unwrap_err();

        assert!(matches!(err, B2Error::Argument(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn authorize_unreachable_server_is_auth_error() {
        let authorize_url = Url::parse("http://127.0.0.1:1/b2api/v1/b2_authorize_account").unwrap();
        let client = B2Client::new(authorize_url, Duration::from_secs(5)).unwrap();

        let err = client.authorize("account", "key").await.unwrap_err();

        assert!(matches!(err, B2Error::Auth { .. }));
    }

    #[tokio::test]
    async fn get_file_info_returns_every_field() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "accountId": "7eecc42b9675",
            "action": "upload",
            "bucketId": "e73ede9c9c8412db49f60715",
            "contentLength": 122573,
            "contentSha1": "a01a21253a07fb08a354acd30f3a6f32abb76821",
            "contentType": "image/jpeg",
            "fileId": "4_z1f6abee52698187b59c70017_f11735400d3d595c3_d20170517_m160830_c001_v0001019_t0013",
            "fileInfo": { "src_last_modified_millis": "1495037310000" },
            "fileName": "After_gym_casual.jpg",
            "uploadTimestamp": 1495037310000u64
        });
        let mock = server
            .mock("POST", "/b2api/v1/b2_get_file_info")
            .match_header("authorization", TOKEN)
            .match_body(Matcher::Json(serde_json::json!({
                "fileId": "4_z1f6abee52698187b59c70017_f11735400d3d595c3_d20170517_m160830_c001_v0001019_t0013"
            })))
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await;

        let info = client_for(&server)
            .get_file_info(
                &server_url(&server),
                "4_z1f6abee52698187b59c70017_f11735400d3d595c3_d20170517_m160830_c001_v0001019_t0013",
                TOKEN,
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(
            info,
            FileInfo {
                account_id: "7eecc42b9675".to_string(),
                bucket_id: "e73ede9c9c8412db49f60715".to_string(),
                content_length: 122573,
                content_sha1: "a01a21253a07fb08a354acd30f3a6f32abb76821".to_string(),
                content_type: "image/jpeg".to_string(),
                file_id: "4_z1f6abee52698187b59c70017_f11735400d3d595c3_d20170517_m160830_c001_v0001019_t0013".to_string(),
                file_info: BTreeMap::from([(
                    "src_last_modified_millis".to_string(),
                    "1495037310000".to_string()
                )]),
                file_name: "After_gym_casual.jpg".to_string(),
                upload_timestamp: Some(Timestamp(UNIX_EPOCH + Duration::from_millis(1495037310000))),
            }
        );
    }

    #[tokio::test]
    async fn get_file_info_not_found_is_api_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/b2api/v1/b2_get_file_info")
            .with_status(404)
            .with_body(r#"{"status": 404, "code": "not_found", "message": "File not present: missing"}"#)
            .create_async()
            .await;

        let err = client_for(&server)
            .get_file_info(&server_url(&server), "missing", TOKEN)
            .await
            .unwrap_err();

        match err {
            B2Error::Api { operation, reason, .. } => {
                assert_eq!(operation, "b2_get_file_info");
                assert_eq!(reason, "404 (not_found): File not present: missing");
            }
            other => panic!("expected api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn download_by_id_writes_exact_body() -> anyhow::Result<()> {
        let mut server = mockito::Server::new_async().await;
        let bytes: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();
        let mock = server
            .mock("GET", "/b2api/v1/b2_download_file_by_id")
            .match_query(Matcher::UrlEncoded("fileId".into(), "4_zabc".into()))
            .match_header("authorization", TOKEN)
            .with_status(200)
            .with_body(&bytes)
            .create_async()
            .await;
        let dir = TempDir::new()?;
        let target = dir.path().join("downloadedById.jpg");
        fs::write(&target, b"stale")?;

        let client = client_for(&server);
        let complete = client
            .download_by_id(TOKEN, &server_url(&server), "4_zabc", &target)
            .finish()
            .await?;

        mock.assert_async().await;
        assert_eq!(complete.bytes_written, bytes.len() as u64);
        assert_eq!(fs::read(&target)?, bytes);
        Ok(())
    }

    #[tokio::test]
    async fn download_by_id_failure_is_download_error() -> anyhow::Result<()> {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/b2api/v1/b2_download_file_by_id")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body(r#"{"status": 401, "code": "bad_auth_token", "message": "Invalid authorization token"}"#)
            .create_async()
            .await;
        let dir = TempDir::new()?;
        let target = dir.path().join("downloadedById.jpg");

        let client = client_for(&server);
        let err = client
            .download_by_id("expired", &server_url(&server), "4_zabc", &target)
            .finish()
            .await
            .unwrap_err();

        assert!(matches!(err, B2Error::Download { .. }));
        assert!(!target.exists());
        Ok(())
    }

    #[tokio::test]
    async fn download_by_name_writes_body() -> anyhow::Result<()> {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/file/studyofchrist/After_gym_casual.jpg")
            .match_header("authorization", TOKEN)
            .with_status(200)
            .with_body("jpeg bytes")
            .create_async()
            .await;
        let dir = TempDir::new()?;
        let target = dir.path().join("downloadedByName.jpg");

        let client = client_for(&server);
        client
            .download_by_name(
                TOKEN,
                &server_url(&server),
                "studyofchrist",
                "After_gym_casual.jpg",
                &target,
            )
            .finish()
            .await?;

        mock.assert_async().await;
        assert_eq!(fs::read_to_string(&target)?, "jpeg bytes");
        Ok(())
    }

    #[tokio::test]
    async fn download_by_name_not_found_leaves_existing_file() -> anyhow::Result<()> {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/file/studyofchrist/missing.jpg")
            .with_status(404)
            .with_body("not found")
            .create_async()
            .await;
        let dir = TempDir::new()?;
        let target = dir.path().join("downloadedByName.jpg");
        fs::write(&target, b"keep me")?;

        let client = client_for(&server);
        let err = client
            .download_by_name(TOKEN, &server_url(&server), "studyofchrist", "missing.jpg", &target)
            .finish()
            .await
            .unwrap_err();

        match err {
            B2Error::Download { reason, .. } => assert_eq!(reason, "404 Not Found - not found"),
            other => panic!("expected download error, got {other:?}"),
        }
        assert_eq!(fs::read(&target)?, b"keep me");
        assert_eq!(fs::read_dir(dir.path())?.count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn download_by_name_with_unusable_download_url_is_download_error() -> anyhow::Result<()> {
        let client = B2Client::new(Url::parse(DEFAULT_AUTHORIZE_URL)?, Duration::from_secs(5))?;
        let download_url = Url::parse("mailto:downloads@example.com")?;
        let dir = TempDir::new()?;
        let target = dir.path().join("downloadedByName.jpg");

        let err = client
            .download_by_name(TOKEN, &download_url, "studyofchrist", "a.jpg", &target)
            .finish()
            .await
            .unwrap_err();

        match err {
            B2Error::Download { target: failed, .. } => assert_eq!(failed, target),
            other => panic!("expected download error, got {other:?}"),
        }
        assert!(!target.exists());
        Ok(())
    }

    #[tokio::test]
    async fn body_cut_off_midway_is_download_error() -> anyhow::Result<()> {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/b2api/v1/b2_download_file_by_id")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_chunked_body(|w| {
                w.write_all(b"first part of the body")?;
                Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "connection dropped",
                ))
            })
            .create_async()
            .await;
        let dir = TempDir::new()?;
        let target = dir.path().join("downloadedById.jpg");
        fs::write(&target, b"previous content")?;

        let client = client_for(&server);
        let err = client
            .download_by_id(TOKEN, &server_url(&server), "4_zabc", &target)
            .finish()
            .await
            .unwrap_err();

        assert!(matches!(err, B2Error::Download { .. }));
        assert_eq!(fs::read(&target)?, b"previous content");
        assert_eq!(fs::read_dir(dir.path())?.count(), 1);
        Ok(())
    }
}
