use crate::crypto::{encode_secret, is_valid_secret};
use crate::entry::{CURRENT_VERSION, ImportCandidate};
use crate::error::{Error, Result};
use crate::export::PortableFile;
use crate::payload::{MigrationPayload, OTP_TYPE_HOTP};
use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use percent_encoding::percent_decode_str;
use prost::Message;
use url::Url;

pub const SINGLE_URI_PREFIX: &str = "otpauth://totp/";
pub const BATCH_URI_PREFIX: &str = "otpauth-migration://offline?";
pub const NO_NAME: &str = "<NO NAME>";

// Exporters differ on trailing padding.
const PAYLOAD_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Candidates decoded from one piece of external input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportBatch {
    pub candidates: Vec<ImportCandidate>,
    /// Zero-based position of this part in a multi-part export.
    pub batch_index: i32,
    pub batch_size: i32,
}

impl ImportBatch {
    fn single(candidates: Vec<ImportCandidate>) -> Self {
        ImportBatch {
            candidates,
            batch_index: 0,
            batch_size: 1,
        }
    }
}

/// Route raw query text to the matching decoder. `None` when the text is
/// not an import link at all.
pub fn decode_query(text: &str) -> Option<Result<ImportBatch>> {
    let text = text.trim();
    if text.starts_with(SINGLE_URI_PREFIX) {
        Some(decode_single_uri(text).map(ImportBatch::single))
    } else if text.starts_with(BATCH_URI_PREFIX) {
        Some(decode_batch_uri(text))
    } else {
        None
    }
}

/// `otpauth://totp/<name>?secret=<base32>`
///
/// A missing `secret` or an unparseable link is [`Error::MalformedUri`]; a
/// `secret` that is not base32 is [`Error::InvalidSecret`].
pub fn decode_single_uri(text: &str) -> Result<Vec<ImportCandidate>> {
    let url = Url::parse(text.trim()).map_err(|e| Error::MalformedUri(e.to_string()))?;

    if url.scheme() != "otpauth" {
        return Err(Error::MalformedUri(format!(
            "unexpected scheme '{}'",
            url.scheme()
        )));
    }
    let kind = url.host_str().unwrap_or("").to_lowercase();
    if kind != "totp" {
        return Err(Error::MalformedUri(format!(
            "unsupported otpauth type '{kind}', only 'totp' is supported"
        )));
    }

    let path = url.path();
    let name = percent_decode_str(path.strip_prefix('/').unwrap_or(path))
        .decode_utf8_lossy()
        .into_owned();

    let secret = url
        .query_pairs()
        .find(|(k, _)| k == "secret")
        .map(|(_, v)| v.into_owned())
        .ok_or_else(|| Error::MalformedUri("missing 'secret' parameter".to_string()))?;

    if !is_valid_secret(&secret) {
        return Err(Error::InvalidSecret);
    }

    Ok(vec![ImportCandidate { name, secret }])
}

/// Display name for an exported account.
pub fn normalize_name(issuer: &str, name: &str) -> String {
    match (issuer.is_empty(), name.is_empty()) {
        (false, false) => format!("{issuer}: {name}"),
        (false, true) => format!("{issuer}: {NO_NAME}"),
        (true, false) => name.to_string(),
        (true, true) => NO_NAME.to_string(),
    }
}

/// `otpauth-migration://offline?data=<base64 protobuf>`
pub fn decode_batch_uri(text: &str) -> Result<ImportBatch> {
    let url = Url::parse(text.trim()).map_err(|e| Error::MalformedUri(e.to_string()))?;
    if url.scheme() != "otpauth-migration" || url.host_str() != Some("offline") {
        return Err(Error::MalformedUri(
            "expected otpauth-migration://offline".to_string(),
        ));
    }

    // query decoding turns an unescaped '+' into a space
    let data = url
        .query_pairs()
        .find(|(k, _)| k == "data")
        .map(|(_, v)| v.replace(' ', "+"))
        .ok_or_else(|| Error::MalformedUri("missing 'data' parameter".to_string()))?;

    let bytes = PAYLOAD_BASE64
        .decode(data.as_bytes())
        .map_err(|e| Error::MalformedPayload(format!("bad base64: {e}")))?;
    let payload = MigrationPayload::decode(bytes.as_slice())
        .map_err(|e| Error::MalformedPayload(format!("bad payload: {e}")))?;

    let mut candidates = Vec::with_capacity(payload.otp_parameters.len());
    for params in &payload.otp_parameters {
        let name = normalize_name(&params.issuer, &params.name);
        if params.secret.is_empty() {
            tracing::warn!(%name, "skipping exported account without a secret");
            continue;
        }
        if params.r#type == OTP_TYPE_HOTP {
            tracing::warn!(%name, "counter-based account imported as time-based");
        }
        candidates.push(ImportCandidate {
            name,
            secret: encode_secret(&params.secret),
        });
    }

    tracing::debug!(
        count = candidates.len(),
        batch_index = payload.batch_index,
        batch_size = payload.batch_size,
        "decoded batch export"
    );
    Ok(ImportBatch {
        candidates,
        batch_index: payload.batch_index,
        batch_size: payload.batch_size,
    })
}

/// Portable export file written by [`crate::export::export_to`].
pub fn decode_export_file(json: &str) -> Result<Vec<ImportCandidate>> {
    let file: PortableFile =
        serde_json::from_str(json).map_err(|e| Error::MalformedPayload(e.to_string()))?;
    if file.version != CURRENT_VERSION {
        return Err(Error::UnsupportedVersion(file.version));
    }

    file.authenticators
        .into_iter()
        .map(|entry| {
            if entry.is_encrypted {
                return Err(Error::MalformedPayload(format!(
                    "entry '{}' is encrypted",
                    entry.name
                )));
            }
            if !is_valid_secret(&entry.key) {
                return Err(Error::InvalidSecret);
            }
            Ok(ImportCandidate {
                name: entry.name,
                secret: entry.key,
            })
        })
        .collect()
}
