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
//! SS58 addresses

use blake2::{Blake2b512, Digest};

use crate::params::PK_LEN_25519;

const SS58_PREFIX: &[u8] = b"SS58PRE";
const CHECKSUM_LEN: usize = 2;

/// SS58 address errors
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    /// Address types above 16383 have no SS58 encoding
    #[error("address type {0} cannot be encoded")]
    InvalidAddressType(u16),
}

fn prefix_bytes(address_type: u16) -> Result<Vec<u8>, AddressError> {
    match address_type {
        0..=63 => Ok(vec![address_type as u8]),
        64..=16383 => {
            let first = ((address_type & 0b0000_0000_1111_1100) >> 2) as u8 | 0b0100_0000;
            let second = ((address_type >> 8) as u8) | ((address_type & 0b11) << 6) as u8;
            Ok(vec![first, second])
        }
        _ => Err(AddressError::InvalidAddressType(address_type)),
    }
}

/// Encode a public key as an SS58 address of the given type
pub fn ss58_encode(address_type: u16, public_key: &[u8; PK_LEN_25519]) -> Result<String, AddressError> {
    let mut payload = prefix_bytes(address_type)?;
    payload.extend_from_slice(public_key);

    let mut hasher = Blake2b512::new();
    hasher.update(SS58_PREFIX);
    hasher.update(&payload);
    let checksum = hasher.finalize();

    payload.extend_from_slice(&checksum[..CHECKSUM_LEN]);
    Ok(bs58::encode(payload).into_string())
}
