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
//! Transaction version gate

use byteorder::{ByteOrder, LittleEndian};

use crate::config::AppConfig;
use crate::params::VERSION_HEADER_LEN;

/// Transaction and spec version incompatibility
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    /// Transaction version is neither the current nor the previous one
    #[error("transaction version {0} is not supported")]
    UnsupportedMajor(u32),

    /// Spec version is older than the oldest supported one
    #[error("spec version {0} is not supported")]
    UnsupportedSpec(u32),
}

/// Versions declared by a transaction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxVersionInfo {
    /// Transaction version
    pub major: u32,
    /// Spec version
    pub minor: u32,
}

impl TxVersionInfo {
    /// Read the header at the start of `data`, returning the rest
    pub fn parse(data: &[u8]) -> Option<(Self, &[u8])> {
        if data.len() < VERSION_HEADER_LEN {
            return None;
        }
        let (header, rest) = data.split_at(VERSION_HEADER_LEN);
        let info = TxVersionInfo {
            major: LittleEndian::read_u32(&header[..4]),
            minor: LittleEndian::read_u32(&header[4..]),
        };
        Some((info, rest))
    }

    /// Header bytes as sent ahead of the transaction
    pub fn serialize(&self) -> [u8; VERSION_HEADER_LEN] {
        let mut header = [0u8; VERSION_HEADER_LEN];
        LittleEndian::write_u32(&mut header[..4], self.major);
        LittleEndian::write_u32(&mut header[4..], self.minor);
        header
    }
}

/// Accept the current and the previous transaction version, with a spec
/// version not older than the configured minimum.
pub fn check(config: &AppConfig, tx: TxVersionInfo) -> Result<(), VersionError> {
    let supported = tx.major == config.tx_version_current
        || Some(tx.major) == config.tx_version_previous();
    if !supported {
        return Err(VersionError::UnsupportedMajor(tx.major));
    }

    if tx.minor < config.min_spec_version {
        return Err(VersionError::UnsupportedSpec(tx.minor));
    }

    Ok(())
}
