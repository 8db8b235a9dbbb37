use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use {
    jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind},
    secrecy::{ExposeSecret, Secret, SecretVec},
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use tollgate_config::constants::{JWT_ALGORITHM, JWT_SECRET_HEX_LEN};

use crate::validator::AuthError;

/// Errors from loading, creating or signing with a [`JwtSecret`].
#[derive(Debug, thiserror::Error)]
pub enum JwtSecretError {
    #[error(transparent)]
    HexDecode(#[from] hex::FromHexError),

    #[error("JWT secret is expected to have {expected} hex digits, {actual} provided")]
    InvalidLength { expected: usize, actual: usize },

    #[error("JWT secret must not be empty")]
    Empty,

    #[error("failed to read JWT secret from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write JWT secret to {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to sign token: {0}")]
    Encode(#[from] jsonwebtoken::errors::Error),
}

/// The shared HMAC key that bearer tokens are signed with.
///
/// Immutable once built and cheap to clone: every listener and request shares
/// the same allocation. The bytes are zeroed on drop and never printed.
#[derive(Clone)]
pub struct JwtSecret(Arc<SecretVec<u8>>);

impl JwtSecret {
    /// Wrap raw key bytes. Any non-empty length is accepted.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, JwtSecretError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(JwtSecretError::Empty);
        }
        Ok(Self(Arc::new(Secret::new(bytes))))
    }

    /// Parse a hex-encoded 256-bit key, with or without a leading `0x`.
    pub fn from_hex(hex: impl AsRef<str>) -> Result<Self, JwtSecretError> {
        let hex = hex.as_ref().trim();
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        if hex.len() != JWT_SECRET_HEX_LEN {
            return Err(JwtSecretError::InvalidLength {
                expected: JWT_SECRET_HEX_LEN,
                actual: hex.len(),
            });
        }
        Self::new(hex::decode(hex)?)
    }

    /// Read a hex-encoded key from `path`.
    pub fn from_file(path: &Path) -> Result<Self, JwtSecretError> {
        let hex = std::fs::read_to_string(path).map_err(|source| JwtSecretError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_hex(hex)
    }

    /// Generate a random key and store it hex-encoded at `path`, creating
    /// parent directories as needed.
    pub fn try_create(path: &Path) -> Result<Self, JwtSecretError> {
        let write_err = |source| JwtSecretError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(write_err)?;
        }
        let secret = Self::random();
        std::fs::write(path, secret.to_hex()).map_err(write_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(write_err)?;
        }
        debug!(path = %path.display(), "created JWT secret");
        Ok(secret)
    }

    /// Load the key at `path`, or create one there if the file is missing.
    pub fn load_or_create(path: &Path) -> Result<Self, JwtSecretError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Self::try_create(path)
        }
    }

    /// A fresh random 256-bit key.
    pub fn random() -> Self {
        let bytes: [u8; 32] = rand::random();
        Self(Arc::new(Secret::new(bytes.to_vec())))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes())
    }

    /// Sign `claims` as a compact HS256 token. Usually a [`Claims`], but any
    /// serializable payload is accepted.
    pub fn encode<T: Serialize>(&self, claims: &T) -> Result<String, JwtSecretError> {
        let key = EncodingKey::from_secret(self.bytes());
        Ok(jsonwebtoken::encode(&Header::new(JWT_ALGORITHM), claims, &key)?)
    }

    /// Verify the signature and temporal claims of `token` and return its
    /// claims. Freshness of `iat` is checked by the caller.
    ///
    /// `exp` and `nbf` are honoured with zero leeway when present but never
    /// required, and `aud` is ignored.
    pub(crate) fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(JWT_ALGORITHM);
        validation.set_required_spec_claims::<&str>(&[]);
        validation.leeway = 0;
        validation.validate_nbf = true;
        validation.validate_aud = false;

        let key = DecodingKey::from_secret(self.bytes());
        match jsonwebtoken::decode::<Claims>(token, &key, &validation) {
            Ok(data) => Ok(data.claims),
            Err(err) => Err(match err.kind() {
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                ErrorKind::InvalidAlgorithm => AuthError::InvalidToken(
                    "unsupported signature algorithm, only HS256 is accepted".into(),
                ),
                ErrorKind::ExpiredSignature => AuthError::InvalidToken("token expired".into()),
                ErrorKind::ImmatureSignature => {
                    AuthError::InvalidToken("token not yet valid".into())
                },
                _ => AuthError::InvalidToken(err.to_string()),
            }),
        }
    }

    fn bytes(&self) -> &[u8] {
        self.0.expose_secret()
    }
}

impl PartialEq for JwtSecret {
    fn eq(&self, other: &Self) -> bool {
        self.bytes() == other.bytes()
    }
}

impl Eq for JwtSecret {}

impl fmt::Debug for JwtSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JwtSecret([REDACTED])")
    }
}

impl FromStr for JwtSecret {
    type Err = JwtSecretError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Token payload. Only `iat` matters for freshness; `exp` is carried so
/// callers can mint tokens that also expire on their own.
///
/// Both are NumericDates: seconds since the Unix epoch, possibly fractional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Issued-at, seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<f64>,
}

impl Claims {
    pub fn issued_at(iat: u64) -> Self {
        Self {
            iat: Some(iat as f64),
            exp: None,
        }
    }

    /// Claims issued at the current wall-clock second.
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self::issued_at(secs)
    }

    /// `iat` in milliseconds. A missing claim reads as the epoch.
    pub fn issued_at_ms(&self) -> f64 {
        self.iat.unwrap_or(0.0) * 1000.0
    }
}
