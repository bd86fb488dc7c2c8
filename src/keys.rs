/*******************************************************************************
*   (c) 2020 ZondaX GmbH
*
*  Licensed under the Apache License, Version 2.0 (the "License");
*  you may not use this file except in compliance with the License.
*  You may obtain a copy of the License at
*
*      http://www.apache.org/licenses/LICENSE-2.0
*
*  Unless required by applicable law or agreed to in writing, software
*  distributed under the License is distributed on an "AS IS" BASIS,
*  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
*  See the License for the specific language governing permissions and
*  limitations under the License.
********************************************************************************/
//! Key kinds and scoped access to key material

use zeroize::Zeroizing;

use crate::config::AppConfig;
use crate::params::{SCALAR_LEN_ED25519, SK_LEN_25519};
use crate::path::ValidatedPath;

/// Signature scheme of a key
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyKind {
    /// Ed25519
    Ed25519 = 0,
    /// Sr25519, only in builds that enable it
    Sr25519 = 1,
}

impl KeyKind {
    /// Tag prepended to signatures
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for KeyKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(KeyKind::Ed25519),
            1 => Ok(KeyKind::Sr25519),
            other => Err(other),
        }
    }
}

/// Failure reported by a key store
#[derive(Debug, thiserror::Error)]
#[error("key store failure: {0}")]
pub struct KeyStoreError(pub String);

/// Secure storage the key material is derived from
pub trait KeyStore {
    /// Derive the private key buffer (secret || chain code) for `path`
    fn derive_key(
        &mut self,
        path: &ValidatedPath,
        kind: KeyKind,
    ) -> Result<Zeroizing<[u8; SK_LEN_25519]>, KeyStoreError>;
}

/// Key derivation failures
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// The requested kind is not enabled in this build
    #[error("key kind {0:?} is not supported by this build")]
    UnsupportedKeyKind(KeyKind),

    /// The key store failed
    #[error("key derivation failed: {0}")]
    DerivationFailed(#[from] KeyStoreError),
}

/// Private key material for a single operation.
///
/// Not `Clone`; the buffer is zeroized when the handle is dropped, whatever
/// path the caller leaves by.
pub struct ScopedKeyHandle {
    kind: KeyKind,
    secret: Zeroizing<[u8; SK_LEN_25519]>,
}

impl ScopedKeyHandle {
    /// Kind the key was derived for
    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    pub(crate) fn scalar(&self) -> &[u8] {
        &self.secret[..SCALAR_LEN_ED25519]
    }
}

impl std::fmt::Debug for ScopedKeyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedKeyHandle")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Derive the key for `path`, checking the kind is available first
pub fn derive<K: KeyStore + ?Sized>(
    config: &AppConfig,
    store: &mut K,
    path: &ValidatedPath,
    kind: KeyKind,
) -> Result<ScopedKeyHandle, KeyError> {
    if kind == KeyKind::Sr25519 && !config.sr25519_enabled {
        return Err(KeyError::UnsupportedKeyKind(kind));
    }

    let secret = store.derive_key(path, kind)?;
    Ok(ScopedKeyHandle { kind, secret })
}
