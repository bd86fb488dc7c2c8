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
//! Derivation paths and their validation

use byteorder::{ByteOrder, LittleEndian};

use crate::params::{
    HDPATH_0_DEFAULT, HDPATH_1_DEFAULT, HDPATH_1_RECOVERY, HDPATH_2_DEFAULT, HDPATH_3_DEFAULT,
    HDPATH_4_DEFAULT, HDPATH_LEN_DEFAULT,
};

/// Structural rejection of a derivation path
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// Path does not have exactly 5 components
    #[error("derivation path must have 5 components, got {0}")]
    InvalidDepth(usize),

    /// First component is not 44'
    #[error("invalid derivation path purpose {0:#010x}")]
    InvalidPurpose(u32),

    /// Second component is not an accepted coin type
    #[error("invalid derivation path coin type {0:#010x}")]
    InvalidCoinType(u32),

    /// Serialized path is not a whole number of components
    #[error("serialized derivation path has {0} bytes, not a multiple of 4")]
    Malformed(usize),
}

/// Derivation path as received from the host
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DerivationPath {
    components: Vec<u32>,
}

impl DerivationPath {
    /// Path from raw components
    pub fn new(components: Vec<u32>) -> Self {
        DerivationPath { components }
    }

    /// `m/44'/709'/account/change/index` with the default coin type
    pub fn avail(account: u32, change: u32, index: u32) -> Self {
        Self::new(vec![HDPATH_0_DEFAULT, HDPATH_1_DEFAULT, account, change, index])
    }

    /// Parse little endian u32 components
    pub fn from_bytes(data: &[u8]) -> Result<Self, PathError> {
        if data.len() % 4 != 0 {
            return Err(PathError::Malformed(data.len()));
        }
        let components = data.chunks_exact(4).map(LittleEndian::read_u32).collect();
        Ok(DerivationPath { components })
    }

    /// Serialize as little endian u32 components
    pub fn serialize(&self) -> Vec<u8> {
        let mut m = vec![0u8; self.components.len() * 4];
        for (out, component) in m.chunks_exact_mut(4).zip(&self.components) {
            LittleEndian::write_u32(out, *component);
        }
        m
    }

    /// Raw components
    pub fn components(&self) -> &[u32] {
        &self.components
    }
}

impl Default for DerivationPath {
    fn default() -> Self {
        Self::new(vec![
            HDPATH_0_DEFAULT,
            HDPATH_1_DEFAULT,
            HDPATH_2_DEFAULT,
            HDPATH_3_DEFAULT,
            HDPATH_4_DEFAULT,
        ])
    }
}

/// A path that passed [`validate`]. Only this module can build one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValidatedPath([u32; HDPATH_LEN_DEFAULT]);

impl ValidatedPath {
    /// Validated components
    pub fn components(&self) -> &[u32; HDPATH_LEN_DEFAULT] {
        &self.0
    }

    /// Whether the path uses the recovery coin type
    pub fn is_recovery(&self) -> bool {
        self.0[1] == HDPATH_1_RECOVERY
    }
}

/// Check depth, purpose and coin type of a path
pub fn validate(path: &DerivationPath, allow_recovery: bool) -> Result<ValidatedPath, PathError> {
    let components: [u32; HDPATH_LEN_DEFAULT] = path
        .components()
        .try_into()
        .map_err(|_| PathError::InvalidDepth(path.components().len()))?;

    if components[0] != HDPATH_0_DEFAULT {
        return Err(PathError::InvalidPurpose(components[0]));
    }

    let coin = components[1];
    let recovery_ok = allow_recovery && coin == HDPATH_1_RECOVERY;
    if coin != HDPATH_1_DEFAULT && !recovery_ok {
        return Err(PathError::InvalidCoinType(coin));
    }

    Ok(ValidatedPath(components))
}
