//! HTTP client for one remote drive
//!
//! Mirrors the gateway's route table. Every call is signed with a token
//! whose audience is the exact query string sent, and long-running calls
//! are decoded through the keep-alive reader.

use crate::error::{ClientError, ClientResult, error_from_status, error_from_text};
use bytes::Bytes;
use chrono::Utc;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt, TryStreamExt};
use objectio_auth::{AUTHORIZATION_HEADER, AuthError, Credentials, TIME_HEADER, issue_token, request_time};
use objectio_common::{
    BitrotVerifier, Config, DataUsageEntry, DataUsageInfo, DeleteOptions, DeleteVersionsErrsResp,
    DiskInfo, Endpoint, Error, FileInfo, FileInfoVersions, MetaCacheEntry, RawFileInfo,
    ReadMultipleReq, ReadMultipleResp, ReadOptions, RenameOptions, ScannerResp, StatInfo,
    VerifyFileResp, VolInfo, WalkDirOptions,
};
use objectio_proto::codec;
use objectio_proto::messages::{
    CheckPartsParams, DeleteFileParams, DeleteVersionParams, DiskParams, MetadataParams,
    ReadVersionParams, RenameDataParams, RenameDataResp, VolParams,
};
use objectio_proto::params::{self, method, param, rpc};
use objectio_proto::{DEFAULT_MAX_BLOCK_SIZE, ProtocolError, RpcResponse, wait_for_response, wait_for_stream};
use parking_lot::RwLock;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;

/// Largest record accepted inside a keep-alive payload
const MAX_RECORD_SIZE: usize = DEFAULT_MAX_BLOCK_SIZE;

/// Buffer between the frame decoder and the record decoder of block-streamed calls
const PIPE_CAPACITY: usize = 64 * 1024;

type BodyReader = StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>;

/// Client tunables
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Lifetime of each signed token
    pub token_ttl: Duration,
    pub connect_timeout: Duration,
    /// Largest data block accepted from block-streamed responses
    pub max_block_size: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            token_ttl: Duration::from_secs(15 * 60),
            connect_timeout: Duration::from_secs(5),
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
        }
    }
}

impl From<&Config> for ClientOptions {
    fn from(config: &Config) -> Self {
        Self {
            token_ttl: config.auth.token_ttl(),
            max_block_size: config.keepalive.max_block_size,
            ..Self::default()
        }
    }
}

/// Client for the drive served at one remote endpoint
pub struct StorageRestClient {
    http: reqwest::Client,
    base_url: String,
    prefix: String,
    credentials: Credentials,
    options: ClientOptions,
    disk_id: RwLock<String>,
}

fn body_reader(response: reqwest::Response) -> BodyReader {
    StreamReader::new(response.bytes_stream().map_err(io::Error::other).boxed())
}

async fn check_status(response: reqwest::Response) -> ClientResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(error_from_status(status.as_u16(), &text).into())
}

fn header_value(value: &str) -> ClientResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| AuthError::Internal(e.to_string()).into())
}

fn to_json<T: Serialize>(value: &T) -> ClientResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| Error::from(e).into())
}

const fn flag(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

impl StorageRestClient {
    /// `base_url` is the peer's scheme and authority, e.g. `http://node2:9002`
    pub fn new(
        base_url: impl Into<String>,
        endpoint: &Endpoint,
        credentials: Credentials,
        options: ClientOptions,
    ) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            prefix: params::drive_prefix(&endpoint.route_path()),
            credentials,
            options,
            disk_id: RwLock::new(String::new()),
        })
    }

    /// Identity sent with every call; empty skips the remote check
    pub fn set_disk_id(&self, id: impl Into<String>) {
        *self.disk_id.write() = id.into();
    }

    #[must_use]
    pub fn disk_id(&self) -> String {
        self.disk_id.read().clone()
    }

    fn url(&self, method: &str) -> String {
        format!("{}{}/{}", self.base_url, self.prefix, method)
    }

    fn sign(&self, headers: &mut HeaderMap, audience: &str) -> ClientResult<()> {
        let token = issue_token(&self.credentials, audience, self.options.token_ttl)?;
        headers.insert(AUTHORIZATION_HEADER, header_value(&format!("Bearer {token}"))?);
        headers.insert(TIME_HEADER, header_value(&request_time(Utc::now()))?);
        Ok(())
    }

    async fn call(
        &self,
        method: &str,
        query: &[(&str, &str)],
        body: Option<reqwest::Body>,
    ) -> ClientResult<reqwest::Response> {
        let disk_id = self.disk_id();
        let mut pairs = Vec::with_capacity(query.len() + 1);
        pairs.push((param::DISK_ID, disk_id.as_str()));
        pairs.extend_from_slice(query);

        let mut builder = self.http.post(self.url(method)).query(&pairs);
        if let Some(body) = body {
            builder = builder.body(body);
        }
        let mut request = builder.build()?;
        let audience = request.url().query().unwrap_or_default().to_string();
        self.sign(request.headers_mut(), &audience)?;

        tracing::trace!("storage call {} {}", method, audience);
        check_status(self.http.execute(request).await?).await
    }

    async fn rpc<P, T>(&self, name: &str, params: &P) -> ClientResult<T>
    where
        P: Serialize + Sync,
        T: DeserializeOwned,
    {
        let mut request = self
            .http
            .post(self.url(&format!("rpc/{name}")))
            .header(CONTENT_TYPE, "application/json")
            .body(to_json(params)?)
            .build()?;
        self.sign(request.headers_mut(), "")?;

        let response = check_status(self.http.execute(request).await?).await?;
        let envelope: RpcResponse<T> = response.json().await?;
        envelope
            .into_result()
            .map_err(|e| error_from_text(&e.message).into())
    }

    /// Payload following a keep-alive success terminator
    async fn keepalive_payload(response: reqwest::Response) -> ClientResult<BodyReader> {
        Ok(wait_for_response(body_reader(response)).await?)
    }

    pub async fn health(&self) -> ClientResult<()> {
        self.call(method::HEALTH, &[], None).await?;
        Ok(())
    }

    pub async fn make_vol(&self, volume: &str) -> ClientResult<()> {
        self.call(method::MAKE_VOL, &[(param::VOLUME, volume)], None)
            .await?;
        Ok(())
    }

    pub async fn make_vol_bulk(&self, volumes: &[String]) -> ClientResult<()> {
        let joined = volumes.join(",");
        self.call(method::MAKE_VOL_BULK, &[(param::VOLUMES, &joined)], None)
            .await?;
        Ok(())
    }

    pub async fn list_vols(&self) -> ClientResult<Vec<VolInfo>> {
        Ok(self.call(method::LIST_VOLS, &[], None).await?.json().await?)
    }

    pub async fn delete_vol(&self, volume: &str, force: bool) -> ClientResult<()> {
        self.call(
            method::DELETE_VOL,
            &[(param::VOLUME, volume), (param::FORCE_DELETE, flag(force))],
            None,
        )
        .await?;
        Ok(())
    }

    pub async fn append_file(&self, volume: &str, path: &str, buf: Bytes) -> ClientResult<()> {
        self.call(
            method::APPEND_FILE,
            &[(param::VOLUME, volume), (param::FILE_PATH, path)],
            Some(buf.into()),
        )
        .await?;
        Ok(())
    }

    /// Upload exactly `size` bytes from `body`
    pub async fn create_file<S>(
        &self,
        volume: &str,
        path: &str,
        size: u64,
        body: S,
    ) -> ClientResult<()>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        let size = size.to_string();
        let response = self
            .call(
                method::CREATE_FILE,
                &[
                    (param::VOLUME, volume),
                    (param::FILE_PATH, path),
                    (param::LENGTH, &size),
                ],
                Some(reqwest::Body::wrap_stream(body)),
            )
            .await?;
        Self::keepalive_payload(response).await?;
        Ok(())
    }

    pub async fn write_all(&self, volume: &str, path: &str, buf: Bytes) -> ClientResult<()> {
        self.call(
            method::WRITE_ALL,
            &[(param::VOLUME, volume), (param::FILE_PATH, path)],
            Some(buf.into()),
        )
        .await?;
        Ok(())
    }

    pub async fn read_all(&self, volume: &str, path: &str) -> ClientResult<Bytes> {
        let response = self
            .call(
                method::READ_ALL,
                &[(param::VOLUME, volume), (param::FILE_PATH, path)],
                None,
            )
            .await?;
        Ok(response.bytes().await?)
    }

    pub async fn read_file(
        &self,
        volume: &str,
        path: &str,
        offset: u64,
        length: usize,
        verifier: Option<&BitrotVerifier>,
    ) -> ClientResult<Bytes> {
        let offset = offset.to_string();
        let length = length.to_string();
        let hash = verifier.map(|v| hex::encode(&v.expected)).unwrap_or_default();
        let mut query = vec![
            (param::VOLUME, volume),
            (param::FILE_PATH, path),
            (param::OFFSET, offset.as_str()),
            (param::LENGTH, length.as_str()),
        ];
        if let Some(verifier) = verifier {
            query.push((param::BITROT_ALGO, verifier.algorithm.as_str()));
            query.push((param::BITROT_HASH, hash.as_str()));
        }
        Ok(self.call(method::READ_FILE, &query, None).await?.bytes().await?)
    }

    pub async fn read_file_stream(
        &self,
        volume: &str,
        path: &str,
        offset: u64,
        length: u64,
    ) -> ClientResult<BoxStream<'static, io::Result<Bytes>>> {
        let offset = offset.to_string();
        let length = length.to_string();
        let response = self
            .call(
                method::READ_FILE_STREAM,
                &[
                    (param::VOLUME, volume),
                    (param::FILE_PATH, path),
                    (param::OFFSET, &offset),
                    (param::LENGTH, &length),
                ],
                None,
            )
            .await?;
        Ok(response.bytes_stream().map_err(io::Error::other).boxed())
    }

    pub async fn list_dir(&self, volume: &str, dir_path: &str, count: usize) -> ClientResult<Vec<String>> {
        let count = count.to_string();
        let response = self
            .call(
                method::LIST_DIR,
                &[
                    (param::VOLUME, volume),
                    (param::DIR_PATH, dir_path),
                    (param::COUNT, &count),
                ],
                None,
            )
            .await?;
        Ok(response.json().await?)
    }

    pub async fn rename_file(
        &self,
        src_volume: &str,
        src_path: &str,
        dst_volume: &str,
        dst_path: &str,
    ) -> ClientResult<()> {
        self.call(
            method::RENAME_FILE,
            &[
                (param::SRC_VOLUME, src_volume),
                (param::SRC_PATH, src_path),
                (param::DST_VOLUME, dst_volume),
                (param::DST_PATH, dst_path),
            ],
            None,
        )
        .await?;
        Ok(())
    }

    pub async fn read_version(
        &self,
        volume: &str,
        path: &str,
        version_id: &str,
        opts: ReadOptions,
    ) -> ClientResult<FileInfo> {
        let response = self
            .call(
                method::READ_VERSION,
                &[
                    (param::VOLUME, volume),
                    (param::FILE_PATH, path),
                    (param::VERSION_ID, version_id),
                    (param::READ_DATA, flag(opts.read_data)),
                    (param::HEALING, flag(opts.healing)),
                ],
                None,
            )
            .await?;
        Ok(response.json().await?)
    }

    pub async fn read_xl(&self, volume: &str, path: &str, read_data: bool) -> ClientResult<RawFileInfo> {
        let response = self
            .call(
                method::READ_XL,
                &[
                    (param::VOLUME, volume),
                    (param::FILE_PATH, path),
                    (param::READ_DATA, flag(read_data)),
                ],
                None,
            )
            .await?;
        Ok(response.json().await?)
    }

    /// Delete many versions; one slot per entry of `versions`
    pub async fn delete_versions(
        &self,
        volume: &str,
        versions: &[FileInfoVersions],
    ) -> ClientResult<Vec<Option<Error>>> {
        let total = versions.len().to_string();
        let response = self
            .call(
                method::DELETE_VERSIONS,
                &[(param::VOLUME, volume), (param::TOTAL_VERSIONS, &total)],
                Some(to_json(&versions)?.into()),
            )
            .await?;

        let mut payload = Self::keepalive_payload(response).await?;
        let resp: DeleteVersionsErrsResp = codec::read_record(&mut payload, MAX_RECORD_SIZE)
            .await?
            .ok_or(ClientError::Protocol(ProtocolError::Truncated))?;
        Ok(resp
            .errs
            .into_iter()
            .map(|slot| slot.map(|msg| error_from_text(&msg)))
            .collect())
    }

    /// Check every part of `fi` against its recorded checksum on the remote drive
    pub async fn verify_file(&self, volume: &str, path: &str, fi: &FileInfo) -> ClientResult<()> {
        let response = self
            .call(
                method::VERIFY_FILE,
                &[(param::VOLUME, volume), (param::FILE_PATH, path)],
                Some(to_json(fi)?.into()),
            )
            .await?;

        let mut payload = Self::keepalive_payload(response).await?;
        let resp: VerifyFileResp = codec::read_record(&mut payload, MAX_RECORD_SIZE)
            .await?
            .ok_or(ClientError::Protocol(ProtocolError::Truncated))?;
        match resp.err {
            Some(msg) => Err(error_from_text(&msg).into()),
            None => Ok(()),
        }
    }

    pub async fn stat_info_file(&self, volume: &str, path: &str, glob: bool) -> ClientResult<Vec<StatInfo>> {
        let response = self
            .call(
                method::STAT_INFO_FILE,
                &[
                    (param::VOLUME, volume),
                    (param::FILE_PATH, path),
                    (param::GLOB, flag(glob)),
                ],
                None,
            )
            .await?;

        let mut payload = Self::keepalive_payload(response).await?;
        let mut stats = Vec::new();
        while let Some(stat) = codec::read_record(&mut payload, MAX_RECORD_SIZE).await? {
            stats.push(stat);
        }
        Ok(stats)
    }

    /// Decode a block-streamed response into records sent to `out`
    async fn read_stream<T>(
        &self,
        response: reqwest::Response,
        out: mpsc::Sender<T>,
    ) -> ClientResult<()>
    where
        T: DeserializeOwned + Send,
    {
        let (mut pipe_tx, mut pipe_rx) = tokio::io::duplex(PIPE_CAPACITY);
        let max_block_size = self.options.max_block_size;
        let frames = async move {
            let result = wait_for_stream(body_reader(response), &mut pipe_tx, max_block_size).await;
            drop(pipe_tx);
            result
        };
        let records = async move {
            while let Some(record) = codec::read_record(&mut pipe_rx, MAX_RECORD_SIZE).await? {
                if out.send(record).await.is_err() {
                    return Err(ClientError::Storage(Error::Cancelled));
                }
            }
            Ok(())
        };

        // A decoder that stops early breaks the pipe, so its error wins over the
        // writer's unless the remote itself reported one
        let (framed, decoded) = tokio::join!(frames, records);
        match (framed, decoded) {
            (Err(e @ ProtocolError::Remote(_)), _) => Err(e.into()),
            (_, Err(e)) => Err(e),
            (framed, Ok(())) => framed.map(|_| ()).map_err(Into::into),
        }
    }

    /// Stream the answers to `req` into `out` as they arrive
    pub async fn read_multiple(
        &self,
        req: &ReadMultipleReq,
        out: mpsc::Sender<ReadMultipleResp>,
    ) -> ClientResult<()> {
        let response = self
            .call(method::READ_MULTIPLE, &[], Some(to_json(req)?.into()))
            .await?;
        self.read_stream(response, out).await
    }

    /// Stream the remote namespace described by `opts` into `out`
    pub async fn walk_dir(
        &self,
        opts: &WalkDirOptions,
        out: mpsc::Sender<MetaCacheEntry>,
    ) -> ClientResult<()> {
        let response = self
            .call(
                method::WALK_DIR,
                &[(param::VOLUME, opts.bucket.as_str())],
                Some(to_json(opts)?.into()),
            )
            .await?;
        self.read_stream(response, out).await
    }

    /// Scan a remote volume, forwarding per-object usage to `updates`
    pub async fn ns_scanner(
        &self,
        volume: &str,
        updates: mpsc::Sender<DataUsageEntry>,
    ) -> ClientResult<DataUsageInfo> {
        let response = self
            .call(method::NS_SCANNER, &[(param::VOLUME, volume)], None)
            .await?;

        let (tx, mut rx) = mpsc::channel(1);
        let relay = async move {
            let mut totals = None;
            while let Some(resp) = rx.recv().await {
                match resp {
                    ScannerResp::Update(update) => {
                        if updates.send(update).await.is_err() {
                            return Err(ClientError::Storage(Error::Cancelled));
                        }
                    }
                    ScannerResp::Final(info) => totals = Some(info),
                }
            }
            totals.ok_or_else(|| ClientError::Storage(Error::internal("scan ended without totals")))
        };

        let (streamed, relayed) = tokio::join!(self.read_stream(response, tx), relay);
        streamed?;
        relayed
    }

    pub async fn clean_abandoned_data(&self, volume: &str, path: &str) -> ClientResult<()> {
        // The gateway ignores these without starting a keep-alive session
        if volume.is_empty() || path.is_empty() {
            return Ok(());
        }
        let response = self
            .call(
                method::CLEAN_ABANDONED,
                &[(param::VOLUME, volume), (param::FILE_PATH, path)],
                None,
            )
            .await?;
        Self::keepalive_payload(response).await?;
        Ok(())
    }

    // Typed RPC calls

    pub async fn disk_info(&self) -> ClientResult<DiskInfo> {
        let params = DiskParams {
            disk_id: self.disk_id(),
        };
        self.rpc(rpc::DISK_INFO, &params).await
    }

    pub async fn stat_vol(&self, volume: &str) -> ClientResult<VolInfo> {
        let params = VolParams {
            disk_id: self.disk_id(),
            volume: volume.to_string(),
        };
        self.rpc(rpc::STAT_VOL, &params).await
    }

    pub async fn read_version_rpc(
        &self,
        volume: &str,
        path: &str,
        version_id: &str,
        opts: ReadOptions,
    ) -> ClientResult<FileInfo> {
        let params = ReadVersionParams {
            disk_id: self.disk_id(),
            volume: volume.to_string(),
            file_path: path.to_string(),
            version_id: version_id.to_string(),
            opts,
        };
        self.rpc(rpc::READ_VERSION, &params).await
    }

    pub async fn write_metadata(&self, volume: &str, path: &str, fi: FileInfo) -> ClientResult<()> {
        let params = MetadataParams {
            disk_id: self.disk_id(),
            volume: volume.to_string(),
            file_path: path.to_string(),
            fi,
            update_opts: Default::default(),
        };
        self.rpc(rpc::WRITE_METADATA, &params).await
    }

    pub async fn delete_version(
        &self,
        volume: &str,
        path: &str,
        fi: FileInfo,
        force_del_marker: bool,
    ) -> ClientResult<()> {
        let params = DeleteVersionParams {
            disk_id: self.disk_id(),
            volume: volume.to_string(),
            file_path: path.to_string(),
            fi,
            force_del_marker,
            opts: DeleteOptions::default(),
        };
        self.rpc(rpc::DELETE_VERSION, &params).await
    }

    pub async fn delete(&self, volume: &str, path: &str, opts: DeleteOptions) -> ClientResult<()> {
        let params = DeleteFileParams {
            disk_id: self.disk_id(),
            volume: volume.to_string(),
            file_path: path.to_string(),
            opts,
        };
        self.rpc(rpc::DELETE_FILE, &params).await
    }

    pub async fn rename_data(
        &self,
        src_volume: &str,
        src_path: &str,
        fi: FileInfo,
        dst_volume: &str,
        dst_path: &str,
    ) -> ClientResult<u64> {
        let params = RenameDataParams {
            disk_id: self.disk_id(),
            src_volume: src_volume.to_string(),
            src_path: src_path.to_string(),
            fi,
            dst_volume: dst_volume.to_string(),
            dst_path: dst_path.to_string(),
            opts: RenameOptions::default(),
        };
        let resp: RenameDataResp = self.rpc(rpc::RENAME_DATA, &params).await?;
        Ok(resp.signature)
    }

    pub async fn check_parts(&self, volume: &str, path: &str, fi: FileInfo) -> ClientResult<()> {
        let params = CheckPartsParams {
            disk_id: self.disk_id(),
            volume: volume.to_string(),
            file_path: path.to_string(),
            fi,
        };
        self.rpc(rpc::CHECK_PARTS, &params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objectio_common::DiskCoord;
    use std::path::PathBuf;

    fn client() -> StorageRestClient {
        let endpoint = Endpoint {
            path: PathBuf::from("/mnt/d0"),
            coord: DiskCoord::new(0, 0, 0),
            is_local: false,
        };
        StorageRestClient::new(
            "http://node2:9002/",
            &endpoint,
            Credentials::new("key", "secret"),
            ClientOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_urls() {
        let client = client();
        assert_eq!(
            client.url(method::READ_ALL),
            "http://node2:9002/storage/mnt/d0/v1/readall"
        );
        assert_eq!(
            client.url(&format!("rpc/{}", rpc::DISK_INFO)),
            "http://node2:9002/storage/mnt/d0/v1/rpc/diskinfo"
        );
    }

    #[test]
    fn test_disk_id_is_shared() {
        let client = client();
        assert!(client.disk_id().is_empty());
        client.set_disk_id("abc");
        assert_eq!(client.disk_id(), "abc");
    }

    #[test]
    fn test_sign_sets_headers() {
        let client = client();
        let mut headers = HeaderMap::new();
        client.sign(&mut headers, "volume=b").unwrap();
        let auth = headers.get(AUTHORIZATION_HEADER).unwrap().to_str().unwrap();
        assert!(auth.starts_with("Bearer "));
        assert!(headers.contains_key(TIME_HEADER));
    }

    #[test]
    fn test_options_from_config() {
        let config = Config::from_toml(
            "[auth]\ntoken_ttl_secs = 120\n[keepalive]\nmax_block_size = 4096\n",
        )
        .unwrap();
        let options = ClientOptions::from(&config);
        assert_eq!(options.token_ttl, Duration::from_secs(120));
        assert_eq!(options.max_block_size, 4096);
        assert_eq!(options.connect_timeout, ClientOptions::default().connect_timeout);
    }
}
