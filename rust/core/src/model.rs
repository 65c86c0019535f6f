// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Model identifiers and the small records exchanged with the API.

use crate::error::ModelIdError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque, URL-safe token identifying one uploaded source file.
///
/// Derived from the storage object's id rather than its file name, so storing
/// the same key twice yields the same identifier. The translation service
/// refers to models by this token as well (its "URN").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelIdentifier(String);

impl ModelIdentifier {
    /// Validate an existing identifier string.
    pub fn new(value: impl Into<String>) -> Result<Self, ModelIdError> {
        let value = value.into();
        if value.is_empty() {
            return Err(ModelIdError::Empty);
        }
        if let Some((position, ch)) = value
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(ModelIdError::InvalidCharacter { ch, position });
        }
        Ok(Self(value))
    }

    /// Parse a possibly empty selection value. Empty (or whitespace) means
    /// "nothing selected".
    pub fn parse_optional(value: &str) -> Result<Option<Self>, ModelIdError> {
        let value = value.trim();
        if value.is_empty() {
            Ok(None)
        } else {
            Self::new(value).map(Some)
        }
    }

    /// Derive the identifier for a storage object id (URL-safe base64, no padding).
    pub fn from_object_id(object_id: &str) -> Self {
        Self(URL_SAFE_NO_PAD.encode(object_id.as_bytes()))
    }

    /// Recover the storage object id this identifier was derived from.
    pub fn object_id(&self) -> Option<String> {
        URL_SAFE_NO_PAD
            .decode(self.0.as_bytes())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ModelIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for ModelIdentifier {
    type Err = ModelIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ModelIdentifier {
    type Error = ModelIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ModelIdentifier> for String {
    fn from(id: ModelIdentifier) -> Self {
        id.0
    }
}

/// One stored source file as listed by `GET /models`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Object key (the uploaded file name).
    pub name: String,
    /// Identifier of the stored object.
    pub urn: ModelIdentifier,
}

/// Short-lived, viewer-scoped credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerToken {
    pub access_token: String,
    /// Lifetime in seconds.
    pub expires_in: u64,
}
