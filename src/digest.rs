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
//! BLAKE2b-256 digest of the payload to sign

use blake2::{digest::typenum, Blake2b, Digest as _};

use crate::params::BLAKE2B_DIGEST_SIZE;

type Blake2b256 = Blake2b<typenum::U32>;

/// 32 byte BLAKE2b digest
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Digest([u8; BLAKE2B_DIGEST_SIZE]);

impl Digest {
    /// Digest bytes
    pub fn as_bytes(&self) -> &[u8; BLAKE2B_DIGEST_SIZE] {
        &self.0
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Hash `payload`
pub fn hash(payload: &[u8]) -> Digest {
    let mut hasher = Blake2b256::new();
    hasher.update(payload);

    let mut out = [0u8; BLAKE2B_DIGEST_SIZE];
    out.copy_from_slice(&hasher.finalize());
    Digest(out)
}
