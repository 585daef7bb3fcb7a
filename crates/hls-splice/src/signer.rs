//! Time-bounded asset URIs for interstitials.
//!
//! A signed URI carries `exp` (unix seconds) and `sig`, the hex HMAC-SHA256
//! of `<path>:<exp>` under the shared key.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::Url;

use crate::Result;
use crate::error::SpliceError;

type HmacSha256 = Hmac<Sha256>;

const EXP_PARAM: &str = "exp";
const SIG_PARAM: &str = "sig";

#[derive(Clone)]
pub struct UriSigner {
    key: Vec<u8>,
    ttl: Duration,
}

impl std::fmt::Debug for UriSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UriSigner")
            .field("key", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl UriSigner {
    pub fn new(key: impl Into<Vec<u8>>, ttl: Duration) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(SpliceError::SigningKey {
                reason: "key is empty".to_string(),
            });
        }
        Ok(Self { key, ttl })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Sign `uri`, valid until `now + ttl`. Any existing `exp`/`sig` params
    /// are replaced.
    pub fn sign(&self, uri: &str, now: DateTime<Utc>) -> Result<String> {
        let mut url = parse_url(uri)?;
        let exp = (now + self.ttl).timestamp();
        let sig = self.signature(url.path(), exp)?;

        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != EXP_PARAM && k != SIG_PARAM)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair(EXP_PARAM, &exp.to_string())
            .append_pair(SIG_PARAM, &sig);
        Ok(url.to_string())
    }

    /// Check expiry first, then the signature.
    pub fn verify(&self, uri: &str, now: DateTime<Utc>) -> Result<()> {
        let url = parse_url(uri)?;
        let param = |name: &str| {
            url.query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
                .ok_or_else(|| SpliceError::signature(format!("missing {name} parameter")))
        };

        let exp: i64 = param(EXP_PARAM)?
            .parse()
            .map_err(|_| SpliceError::signature("invalid exp format"))?;
        if now.timestamp() > exp {
            return Err(SpliceError::signature("expired"));
        }

        let provided = hex::decode(param(SIG_PARAM)?)
            .map_err(|_| SpliceError::signature("signature is not hex"))?;
        let mut mac = self.mac()?;
        mac.update(payload(url.path(), exp).as_bytes());
        mac.verify_slice(&provided)
            .map_err(|_| SpliceError::signature("signature mismatch"))
    }

    fn signature(&self, path: &str, exp: i64) -> Result<String> {
        let mut mac = self.mac()?;
        mac.update(payload(path, exp).as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.key).map_err(|e| SpliceError::SigningKey {
            reason: e.to_string(),
        })
    }
}

fn payload(path: &str, exp: i64) -> String {
    format!("{path}:{exp}")
}

fn parse_url(uri: &str) -> Result<Url> {
    Url::parse(uri).map_err(|source| SpliceError::InvalidUrl {
        input: uri.to_string(),
        source,
    })
}
