//! Time-based one-time passwords (RFC 6238).
//!
//! Codes are generated from a credential's revealed TOTP seed. The seed is
//! either a base32 secret or a full `otpauth://totp/...` URI.

use data_encoding::BASE32_NOPAD;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use std::fmt;
use subtle::ConstantTimeEq;
use url::Url;

use vaultkeeper_common::{Error, Result, SecretText, SensitiveBytes};

use crate::model::Credential;

/// Code length used when none is given.
pub const DEFAULT_DIGITS: u32 = 6;

/// Time step in seconds used when none is given.
pub const DEFAULT_PERIOD: u64 = 30;

const URI_SCHEME: &str = "otpauth";
const URI_TYPE: &str = "totp";

/// HMAC hash used for code generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TotpAlgorithm {
    #[default]
    Sha1,
    Sha256,
    Sha512,
}

impl TotpAlgorithm {
    /// Name as written in `otpauth` URIs.
    pub fn as_str(&self) -> &'static str {
        match self {
            TotpAlgorithm::Sha1 => "SHA1",
            TotpAlgorithm::Sha256 => "SHA256",
            TotpAlgorithm::Sha512 => "SHA512",
        }
    }

    /// Parse an algorithm name, ignoring case.
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "SHA1" => Ok(TotpAlgorithm::Sha1),
            "SHA256" => Ok(TotpAlgorithm::Sha256),
            "SHA512" => Ok(TotpAlgorithm::Sha512),
            other => Err(Error::Validation(format!(
                "Unsupported TOTP algorithm: {}",
                other
            ))),
        }
    }

    fn mac(&self, key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
        match self {
            TotpAlgorithm::Sha1 => hmac_digest::<Hmac<Sha1>>(key, message),
            TotpAlgorithm::Sha256 => hmac_digest::<Hmac<Sha256>>(key, message),
            TotpAlgorithm::Sha512 => hmac_digest::<Hmac<Sha512>>(key, message),
        }
    }
}

impl fmt::Display for TotpAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn hmac_digest<M: Mac + KeyInit>(key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let mut mac = <M as Mac>::new_from_slice(key)
        .map_err(|_| Error::Validation("TOTP secret has an unusable length".to_string()))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Code generation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotpParams {
    pub algorithm: TotpAlgorithm,
    pub digits: u32,
    pub period: u64,
}

impl Default for TotpParams {
    fn default() -> Self {
        Self {
            algorithm: TotpAlgorithm::default(),
            digits: DEFAULT_DIGITS,
            period: DEFAULT_PERIOD,
        }
    }
}

impl TotpParams {
    /// Check that the parameters can produce codes.
    ///
    /// # Errors
    /// - `Validation` if `digits` is outside 6..=8 or `period` is zero
    pub fn validate(&self) -> Result<()> {
        if !(6..=8).contains(&self.digits) {
            return Err(Error::Validation(
                "TOTP digits must be between 6 and 8".to_string(),
            ));
        }
        if self.period == 0 {
            return Err(Error::Validation(
                "TOTP period must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// A generated code and the time it stays valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TotpCode {
    pub code: SecretText,
    pub period: u64,
    pub remaining_secs: u64,
}

/// Decode a base32 secret.
///
/// Whitespace and `-` separators are dropped, case is ignored and `=`
/// padding is optional.
fn decode_secret(secret: &str) -> Result<SensitiveBytes> {
    let normalized = SecretText::new(
        secret
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-' && *c != '=')
            .map(|c| c.to_ascii_uppercase())
            .collect::<String>(),
    );
    if normalized.is_empty() {
        return Err(Error::Validation("TOTP secret is empty".to_string()));
    }
    BASE32_NOPAD
        .decode(normalized.expose().as_bytes())
        .map(SensitiveBytes::new)
        .map_err(|_| Error::Validation("TOTP secret is not valid base32".to_string()))
}

/// Whether `secret` decodes as a base32 TOTP secret.
pub fn is_valid_secret(secret: &str) -> bool {
    decode_secret(secret).is_ok()
}

/// Current Unix time in whole seconds.
pub fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

/// TOTP generator for one secret.
#[derive(Debug, Clone)]
pub struct Totp {
    key: SensitiveBytes,
    params: TotpParams,
}

impl Totp {
    /// Build a generator from a base32 secret.
    ///
    /// # Errors
    /// - `Validation` if the secret is not base32 or `params` are unusable
    pub fn new(secret: &SecretText, params: TotpParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            key: decode_secret(secret.expose())?,
            params,
        })
    }

    /// Build a generator from a stored seed: an `otpauth` URI or a bare
    /// base32 secret with default parameters.
    pub fn from_seed(seed: &SecretText) -> Result<Self> {
        if seed.expose().trim_start().starts_with("otpauth:") {
            let uri = OtpAuthUri::parse(seed.expose())?;
            Self::new(&uri.secret, uri.params)
        } else {
            Self::new(seed, TotpParams::default())
        }
    }

    pub fn params(&self) -> &TotpParams {
        &self.params
    }

    fn code_for_counter(&self, counter: u64) -> Result<SecretText> {
        let digest = self
            .params
            .algorithm
            .mac(self.key.as_bytes(), &counter.to_be_bytes())?;

        // Dynamic truncation; digests are at least 20 bytes so the slice fits.
        let offset = usize::from(digest[digest.len() - 1] & 0x0f);
        let binary = u32::from_be_bytes([
            digest[offset],
            digest[offset + 1],
            digest[offset + 2],
            digest[offset + 3],
        ]) & 0x7fff_ffff;
        let value = binary % 10u32.pow(self.params.digits);

        Ok(SecretText::new(format!(
            "{:0width$}",
            value,
            width = self.params.digits as usize
        )))
    }

    /// Code for the time step containing `unix_secs`.
    pub fn generate(&self, unix_secs: u64) -> Result<TotpCode> {
        Ok(TotpCode {
            code: self.code_for_counter(unix_secs / self.params.period)?,
            period: self.params.period,
            remaining_secs: self.remaining_secs(unix_secs),
        })
    }

    /// Code for the current time.
    pub fn now(&self) -> Result<TotpCode> {
        self.generate(unix_now())
    }

    /// Seconds until the code for `unix_secs` rolls over. Never zero.
    pub fn remaining_secs(&self, unix_secs: u64) -> u64 {
        self.params.period - unix_secs % self.params.period
    }

    /// Check `code` against the steps within `window` of `unix_secs`.
    ///
    /// Surrounding whitespace is ignored. The code must have exactly the
    /// configured number of digits.
    pub fn verify(&self, code: &str, window: u64, unix_secs: u64) -> Result<bool> {
        let code = code.trim();
        if code.len() != self.params.digits as usize || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(false);
        }

        let current = unix_secs / self.params.period;
        let mut matched = false;
        for counter in current.saturating_sub(window)..=current.saturating_add(window) {
            let expected = self.code_for_counter(counter)?;
            matched |= bool::from(expected.expose().as_bytes().ct_eq(code.as_bytes()));
        }
        Ok(matched)
    }
}

/// Parsed `otpauth://totp/` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpAuthUri {
    pub account: String,
    pub issuer: Option<String>,
    pub secret: SecretText,
    pub params: TotpParams,
}

fn invalid_uri(reason: &str) -> Error {
    Error::Validation(format!("Invalid TOTP URI: {}", reason))
}

impl OtpAuthUri {
    /// Parse an `otpauth://totp/[issuer:]account?secret=...` URI.
    ///
    /// The `issuer` query parameter wins over an issuer in the label.
    /// Missing `algorithm`, `digits` and `period` take the defaults.
    ///
    /// # Errors
    /// - `Validation` on a wrong scheme or type, a missing or invalid
    ///   secret, or unusable parameters
    pub fn parse(uri: &str) -> Result<Self> {
        let url = Url::parse(uri.trim()).map_err(|e| invalid_uri(&e.to_string()))?;
        if url.scheme() != URI_SCHEME {
            return Err(invalid_uri("must start with otpauth://"));
        }
        if !url
            .host_str()
            .is_some_and(|host| host.eq_ignore_ascii_case(URI_TYPE))
        {
            return Err(invalid_uri("only the totp type is supported"));
        }

        let label = percent_decode_str(url.path().trim_start_matches('/'))
            .decode_utf8()
            .map_err(|_| invalid_uri("label is not UTF-8"))?;
        let (label_issuer, account) = match label.split_once(':') {
            Some((issuer, account)) => (Some(issuer.trim().to_string()), account.trim()),
            None => (None, label.trim()),
        };

        let mut secret = None;
        let mut issuer = None;
        let mut params = TotpParams::default();
        for (key, value) in url.query_pairs() {
            match &*key {
                "secret" => secret = Some(SecretText::new(value.into_owned())),
                "issuer" => issuer = Some(value.trim().to_string()),
                "algorithm" => params.algorithm = TotpAlgorithm::parse(&value)?,
                "digits" => {
                    params.digits = value.parse().map_err(|_| invalid_uri("bad digits"))?
                }
                "period" => {
                    params.period = value.parse().map_err(|_| invalid_uri("bad period"))?
                }
                _ => {}
            }
        }

        let secret = secret.ok_or_else(|| invalid_uri("missing secret parameter"))?;
        decode_secret(secret.expose())?;
        params.validate()?;

        Ok(Self {
            account: account.to_string(),
            issuer: issuer.or(label_issuer).filter(|i| !i.is_empty()),
            secret,
            params,
        })
    }

    /// Render as an `otpauth` URI. Default parameters are left out.
    pub fn to_uri(&self) -> SecretText {
        let account = utf8_percent_encode(&self.account, NON_ALPHANUMERIC);
        let label = match &self.issuer {
            Some(issuer) => format!(
                "{}:{}",
                utf8_percent_encode(issuer, NON_ALPHANUMERIC),
                account
            ),
            None => account.to_string(),
        };

        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.append_pair("secret", self.secret.expose());
        if let Some(issuer) = &self.issuer {
            query.append_pair("issuer", issuer);
        }
        if self.params.algorithm != TotpAlgorithm::default() {
            query.append_pair("algorithm", self.params.algorithm.as_str());
        }
        if self.params.digits != DEFAULT_DIGITS {
            query.append_pair("digits", &self.params.digits.to_string());
        }
        if self.params.period != DEFAULT_PERIOD {
            query.append_pair("period", &self.params.period.to_string());
        }

        SecretText::new(format!(
            "{}://{}/{}?{}",
            URI_SCHEME,
            URI_TYPE,
            label,
            query.finish()
        ))
    }
}

impl Credential<SecretText> {
    /// Generator for this credential's TOTP seed, if it has one.
    ///
    /// # Errors
    /// - `Validation` if the seed is neither base32 nor a usable URI
    pub fn totp(&self) -> Result<Option<Totp>> {
        self.totp_secret
            .as_ref()
            .filter(|seed| !seed.expose().trim().is_empty())
            .map(Totp::from_seed)
            .transpose()
    }
}
