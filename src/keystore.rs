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
//! Software key store deriving ed25519 keys from a seed with SLIP-0010.
//!
//! Used by emulators and tests in place of the secure element. Every
//! component is derived hardened, the same way the device treats ed25519
//! paths.

use hmac::{Hmac, Mac};
use sha2::Sha512;
use zeroize::Zeroizing;

use crate::keys::{KeyKind, KeyStore, KeyStoreError};
use crate::params::{HARDENED, SK_LEN_25519};
use crate::path::ValidatedPath;

type HmacSha512 = Hmac<Sha512>;

const SLIP10_ED25519_KEY: &[u8] = b"ed25519 seed";

fn hmac_sha512(key: &[u8], parts: &[&[u8]]) -> Result<Zeroizing<[u8; 64]>, KeyStoreError> {
    let mut mac =
        HmacSha512::new_from_slice(key).map_err(|e| KeyStoreError(e.to_string()))?;
    for part in parts {
        mac.update(part);
    }
    let mut out = Zeroizing::new([0u8; 64]);
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// SLIP-0010 ed25519 derivation. Returns `key || chain code`.
pub fn derive_slip10(
    seed: &[u8],
    components: &[u32],
) -> Result<Zeroizing<[u8; SK_LEN_25519]>, KeyStoreError> {
    let mut node = hmac_sha512(SLIP10_ED25519_KEY, &[seed])?;

    for component in components {
        let index = (component | HARDENED).to_be_bytes();
        let (key, chain_code) = node.split_at(32);
        node = hmac_sha512(chain_code, &[&[0u8][..], key, &index[..]])?;
    }

    Ok(node)
}

/// Key store holding a seed in memory
pub struct SoftwareKeyStore {
    seed: Zeroizing<Vec<u8>>,
}

impl SoftwareKeyStore {
    /// Key store over `seed`
    pub fn new(seed: &[u8]) -> Self {
        SoftwareKeyStore {
            seed: Zeroizing::new(seed.to_vec()),
        }
    }
}

impl KeyStore for SoftwareKeyStore {
    fn derive_key(
        &mut self,
        path: &ValidatedPath,
        _kind: KeyKind,
    ) -> Result<Zeroizing<[u8; SK_LEN_25519]>, KeyStoreError> {
        derive_slip10(&self.seed, path.components())
    }
}
