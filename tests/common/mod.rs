//! Shared fixtures for the integration tests: throwaway certificates, an
//! in-process credential, a mock timestamp authority and instrumented format
//! signers.

#![allow(dead_code)]

use async_trait::async_trait;
use batch_signer::adapters::credential::{CredentialSource, SigningOperation};
use batch_signer::adapters::local_store::LocalSigningOperation;
use batch_signer::domain::constants::{OID_SIGNED_DATA, OID_TST_INFO};
use batch_signer::domain::format::FileFormat;
use batch_signer::domain::tsp::{PkiStatusInfo, TimeStampReq, TimeStampResp, TstInfo};
use batch_signer::services::format_registry::{FormatSigner, SigningContext};
use batch_signer::{
    Certificate, SignJob, SignaturePadding, SigningError, SigningRequest, SigningResult,
    TimestampUrl,
};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{EncapsulatedContentInfo, SignedData, SignerInfos};
use const_oid::ObjectIdentifier;
use der::asn1::{GeneralizedTime, Int, OctetString, SetOfVec};
use der::{Any, Decode, Encode};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::{X509Builder, X509NameBuilder, X509};
use std::convert::Infallible;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use warp::Filter;

// ---------------------------------------------------------------------------
// Certificates
// ---------------------------------------------------------------------------

/// A key pair and a self-signed certificate for it.
pub struct TestIdentity {
    pub key: PKey<Private>,
    pub cert: X509,
}

impl TestIdentity {
    pub fn certificate(&self) -> Certificate {
        Certificate::from_der(self.cert.to_der().unwrap()).unwrap()
    }

    pub fn cert_pem(&self) -> Vec<u8> {
        self.cert.to_pem().unwrap()
    }

    pub fn key_pem(&self) -> Vec<u8> {
        self.key.private_key_to_pem_pkcs8().unwrap()
    }

    pub fn pkcs12_der(&self, password: &str) -> Vec<u8> {
        Pkcs12::builder()
            .name("batch-signer test")
            .pkey(&self.key)
            .cert(&self.cert)
            .build2(password)
            .unwrap()
            .to_der()
            .unwrap()
    }

    pub fn operation(&self) -> LocalSigningOperation {
        LocalSigningOperation::from_pem(&self.cert_pem(), &self.key_pem()).unwrap()
    }
}

fn mint(common_name: &str, not_before: &Asn1Time, not_after: &Asn1Time) -> TestIdentity {
    let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", common_name).unwrap();
    name.append_entry_by_text("O", "Batch Signer Tests").unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(0x1234).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder.set_not_before(not_before).unwrap();
    builder.set_not_after(not_after).unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();

    TestIdentity {
        key,
        cert: builder.build(),
    }
}

/// Valid from yesterday for thirty days.
pub fn valid_identity(common_name: &str) -> TestIdentity {
    let yesterday = unix_now() - 86_400;
    mint(
        common_name,
        &Asn1Time::from_unix(yesterday).unwrap(),
        &Asn1Time::days_from_now(30).unwrap(),
    )
}

/// Validity window ended in 2021.
pub fn expired_identity(common_name: &str) -> TestIdentity {
    mint(
        common_name,
        &Asn1Time::from_str("20200101000000Z").unwrap(),
        &Asn1Time::from_str("20210101000000Z").unwrap(),
    )
}

/// Validity window starts ten days from now.
pub fn future_identity(common_name: &str) -> TestIdentity {
    mint(
        common_name,
        &Asn1Time::days_from_now(10).unwrap(),
        &Asn1Time::days_from_now(40).unwrap(),
    )
}

fn unix_now() -> i64 {
    i64::try_from(SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()).unwrap()
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Credential backed by an already loaded local key.
pub struct StaticCredential {
    operation: Arc<LocalSigningOperation>,
}

impl StaticCredential {
    pub fn new(identity: &TestIdentity) -> Arc<Self> {
        Arc::new(Self {
            operation: Arc::new(identity.operation()),
        })
    }
}

#[async_trait]
impl CredentialSource for StaticCredential {
    fn describe(&self) -> String {
        "static test key".to_string()
    }

    async fn certificate(&self, _cancel: &CancellationToken) -> SigningResult<Arc<Certificate>> {
        Ok(Arc::clone(self.operation.certificate()))
    }

    async fn signing_operation(
        &self,
        _cancel: &CancellationToken,
    ) -> SigningResult<Arc<dyn SigningOperation>> {
        let operation: Arc<dyn SigningOperation> = self.operation.clone();
        Ok(operation)
    }
}

/// Resolves fine, but every signature fails as if the key was revoked.
pub struct RevokedCredential {
    certificate: Arc<Certificate>,
    signs: Arc<AtomicUsize>,
}

impl RevokedCredential {
    pub fn new(identity: &TestIdentity) -> Arc<Self> {
        Arc::new(Self {
            certificate: Arc::new(identity.certificate()),
            signs: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn signs(&self) -> usize {
        self.signs.load(Ordering::SeqCst)
    }
}

struct RevokedOperation {
    certificate: Arc<Certificate>,
    signs: Arc<AtomicUsize>,
}

#[async_trait]
impl SigningOperation for RevokedOperation {
    fn certificate(&self) -> &Arc<Certificate> {
        &self.certificate
    }

    async fn sign(
        &self,
        _request: &SigningRequest,
        _cancel: &CancellationToken,
    ) -> SigningResult<Vec<u8>> {
        self.signs.fetch_add(1, Ordering::SeqCst);
        Err(SigningError::CredentialError("key handle revoked".to_string()))
    }
}

#[async_trait]
impl CredentialSource for RevokedCredential {
    fn describe(&self) -> String {
        "revoked test key".to_string()
    }

    async fn certificate(&self, _cancel: &CancellationToken) -> SigningResult<Arc<Certificate>> {
        Ok(Arc::clone(&self.certificate))
    }

    async fn signing_operation(
        &self,
        _cancel: &CancellationToken,
    ) -> SigningResult<Arc<dyn SigningOperation>> {
        Ok(Arc::new(RevokedOperation {
            certificate: Arc::clone(&self.certificate),
            signs: Arc::clone(&self.signs),
        }))
    }
}

/// Fails to produce a certificate at all.
pub struct UnreachableCredential;

#[async_trait]
impl CredentialSource for UnreachableCredential {
    fn describe(&self) -> String {
        "unreachable test key".to_string()
    }

    async fn certificate(&self, _cancel: &CancellationToken) -> SigningResult<Arc<Certificate>> {
        Err(SigningError::CredentialError("HSM unreachable".to_string()))
    }

    async fn signing_operation(
        &self,
        _cancel: &CancellationToken,
    ) -> SigningResult<Arc<dyn SigningOperation>> {
        Err(SigningError::CredentialError("HSM unreachable".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Mock timestamp authority
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsaMode {
    /// Grant every request.
    Grant,
    /// HTTP 503 for every request.
    Unavailable,
    /// HTTP 503 for the first `n` requests, then grant.
    FailFirst(usize),
    /// Sleep before granting.
    Slow(Duration),
    /// Grant, but echo a different nonce.
    WrongNonce,
    /// Answer with a rejection status.
    Reject,
    /// HTTP 200 with a body far larger than any real token.
    Oversized,
}

pub struct MockTsa {
    pub url: TimestampUrl,
    requests: Arc<AtomicUsize>,
}

impl MockTsa {
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

/// Start a timestamp authority on an ephemeral local port.
pub fn spawn_tsa(mode: TsaMode) -> MockTsa {
    let requests = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&requests);

    let route = warp::post()
        .and(warp::path("tsa"))
        .and(warp::body::bytes())
        .and_then(move |body: warp::hyper::body::Bytes| {
            let seen = counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, Infallible>(answer(mode, seen, &body).await) }
        });

    let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);

    MockTsa {
        url: TimestampUrl::new(format!("http://{addr}/tsa")).unwrap(),
        requests,
    }
}

async fn answer(mode: TsaMode, seen: usize, body: &[u8]) -> warp::http::Response<Vec<u8>> {
    let reply = |status: u16, body: Vec<u8>| {
        warp::http::Response::builder()
            .status(status)
            .header("content-type", "application/timestamp-reply")
            .body(body)
            .unwrap()
    };

    match mode {
        TsaMode::Unavailable => return reply(503, Vec::new()),
        TsaMode::FailFirst(n) if seen < n => return reply(503, Vec::new()),
        TsaMode::Slow(delay) => tokio::time::sleep(delay).await,
        TsaMode::Oversized => return reply(200, vec![0x30; 2 * 1024 * 1024]),
        TsaMode::Reject => {
            let resp = TimeStampResp {
                status: PkiStatusInfo {
                    status: 2,
                    status_string: Some(vec!["policy not supported".to_string()]),
                    fail_info: None,
                },
                time_stamp_token: None,
            };
            return reply(200, resp.to_der_bytes().unwrap());
        }
        _ => {}
    }

    let request = TimeStampReq::from_der(body).unwrap();
    let nonce = if mode == TsaMode::WrongNonce {
        Some(Int::new(&[0x05, 0x05]).unwrap())
    } else {
        request.nonce.clone()
    };
    reply(200, granted_reply(&request, nonce))
}

/// A granted `TimeStampResp` whose token wraps an unsigned `SignedData`.
pub fn granted_reply(request: &TimeStampReq, nonce: Option<Int>) -> Vec<u8> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
    let tst = TstInfo {
        version: 1,
        policy: ObjectIdentifier::new_unwrap("1.3.6.1.4.1.4146.2.3"),
        message_imprint: request.message_imprint.clone(),
        serial_number: Int::new(&[0x01, 0x2a]).unwrap(),
        gen_time: GeneralizedTime::from_unix_duration(Duration::from_secs(now)).unwrap(),
        accuracy: None,
        ordering: false,
        nonce,
        tsa: None,
        extensions: None,
    };

    let econtent = Any::encode_from(&OctetString::new(tst.to_der().unwrap()).unwrap()).unwrap();
    let signed = SignedData {
        version: CmsVersion::V3,
        digest_algorithms: SetOfVec::new(),
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: OID_TST_INFO,
            econtent: Some(econtent),
        },
        certificates: None,
        crls: None,
        signer_infos: SignerInfos(SetOfVec::new()),
    };
    let token = ContentInfo {
        content_type: OID_SIGNED_DATA,
        content: Any::encode_from(&signed).unwrap(),
    };

    TimeStampResp {
        status: PkiStatusInfo::granted(),
        time_stamp_token: Some(Any::encode_from(&token).unwrap()),
    }
    .to_der_bytes()
    .unwrap()
}

// ---------------------------------------------------------------------------
// Format signers
// ---------------------------------------------------------------------------

/// Sleeps for a while, signs the file digest and copies input to output.
/// Records how many jobs ran at the same time.
pub struct TrackingSigner {
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl TrackingSigner {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl FormatSigner for TrackingSigner {
    fn name(&self) -> &'static str {
        "tracking"
    }

    fn can_sign(&self, _path: &Path, format: FileFormat) -> bool {
        format != FileFormat::Unknown
    }

    async fn sign(&self, job: &SignJob, ctx: &SigningContext) -> SigningResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = ActiveGuard(&self.active);
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        let content = tokio::fs::read(&job.input_file).await?;
        ctx.sign_digest(job.file_hash_algorithm.digest(&content), SignaturePadding::Pkcs1)
            .await?;
        if !job.is_in_place() {
            tokio::fs::copy(&job.input_file, &job.output_file).await?;
        }
        Ok(())
    }
}

/// Fails files whose name contains `needle`, delegates the rest.
pub struct SelectiveFailure {
    pub needle: &'static str,
    pub inner: Arc<dyn FormatSigner>,
}

#[async_trait]
impl FormatSigner for SelectiveFailure {
    fn name(&self) -> &'static str {
        "selective"
    }

    fn can_sign(&self, path: &Path, format: FileFormat) -> bool {
        self.inner.can_sign(path, format)
    }

    async fn sign(&self, job: &SignJob, ctx: &SigningContext) -> SigningResult<()> {
        if job.display_name().contains(self.needle) {
            return Err(SigningError::SignatureError(format!(
                "{} is corrupt",
                job.display_name()
            )));
        }
        self.inner.sign(job, ctx).await
    }
}

/// Blocks until cancelled.
pub struct HangingSigner {
    pub started: Arc<tokio::sync::Notify>,
}

#[async_trait]
impl FormatSigner for HangingSigner {
    fn name(&self) -> &'static str {
        "hanging"
    }

    fn can_sign(&self, _path: &Path, _format: FileFormat) -> bool {
        true
    }

    async fn sign(&self, _job: &SignJob, ctx: &SigningContext) -> SigningResult<()> {
        self.started.notify_one();
        ctx.cancel.cancelled().await;
        Err(SigningError::Cancelled)
    }
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// Minimal PE-looking file.
pub fn write_pe(dir: &Path, name: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    let mut content = b"MZ".to_vec();
    content.extend(std::iter::repeat(0x90).take(510));
    content.extend(name.as_bytes());
    std::fs::write(&path, content).unwrap();
    path
}

pub fn write_script(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}
