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
//! Tagged signatures over payload digests

use ed25519_dalek::{Signer as _, SigningKey};
use schnorrkel::{signing_context, ExpansionMode, MiniSecretKey};
use zeroize::Zeroizing;

use crate::digest::Digest;
use crate::keys::{KeyKind, ScopedKeyHandle};
use crate::params::{
    MAX_SIGNATURE_BUFFER, PK_LEN_25519, SCALAR_LEN_ED25519, SIG_LEN_25519, SIG_PLUS_TYPE_LEN,
};

/// Signing context of substrate sr25519 signatures
pub const SR25519_SIGNING_CONTEXT: &[u8] = b"substrate";

const _: () = assert!(SIG_PLUS_TYPE_LEN <= MAX_SIGNATURE_BUFFER);

/// Signature primitive failures
#[derive(Debug, thiserror::Error)]
pub enum SignError {
    /// The primitive reported an error
    #[error("signing failed: {0}")]
    SigningFailed(String),
}

/// Signature tagged with the kind of key that produced it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature {
    /// Key kind
    pub kind: KeyKind,
    /// Raw signature
    pub bytes: [u8; SIG_LEN_25519],
}

impl Signature {
    /// `tag || signature`, as answered by the device
    pub fn to_bytes(&self) -> [u8; SIG_PLUS_TYPE_LEN] {
        let mut out = [0u8; SIG_PLUS_TYPE_LEN];
        out[0] = self.kind.tag();
        out[1..].copy_from_slice(&self.bytes);
        out
    }

    /// Parse a tagged signature
    pub fn from_tagged(data: &[u8]) -> Option<Self> {
        if data.len() != SIG_PLUS_TYPE_LEN {
            return None;
        }
        let kind = KeyKind::try_from(data[0]).ok()?;
        let mut bytes = [0u8; SIG_LEN_25519];
        bytes.copy_from_slice(&data[1..]);
        Some(Signature { kind, bytes })
    }
}

fn ed25519_key(key: &ScopedKeyHandle) -> SigningKey {
    let mut seed = Zeroizing::new([0u8; SCALAR_LEN_ED25519]);
    seed.copy_from_slice(key.scalar());
    SigningKey::from_bytes(&seed)
}

fn sr25519_key(key: &ScopedKeyHandle) -> Result<schnorrkel::Keypair, SignError> {
    let mini = MiniSecretKey::from_bytes(key.scalar())
        .map_err(|e| SignError::SigningFailed(e.to_string()))?;
    Ok(mini.expand_to_keypair(ExpansionMode::Ed25519))
}

/// Sign `digest` with the scheme matching the key's kind
pub fn sign(key: &ScopedKeyHandle, digest: &Digest) -> Result<Signature, SignError> {
    let bytes = match key.kind() {
        KeyKind::Ed25519 => ed25519_key(key)
            .try_sign(digest.as_ref())
            .map_err(|e| SignError::SigningFailed(e.to_string()))?
            .to_bytes(),
        KeyKind::Sr25519 => {
            let context = signing_context(SR25519_SIGNING_CONTEXT);
            sr25519_key(key)?
                .sign(context.bytes(digest.as_ref()))
                .to_bytes()
        }
    };

    Ok(Signature {
        kind: key.kind(),
        bytes,
    })
}

/// Public key matching the handle
pub fn public_key(key: &ScopedKeyHandle) -> Result<[u8; PK_LEN_25519], SignError> {
    match key.kind() {
        KeyKind::Ed25519 => Ok(ed25519_key(key).verifying_key().to_bytes()),
        KeyKind::Sr25519 => Ok(sr25519_key(key)?.public.to_bytes()),
    }
}
