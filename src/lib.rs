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
//! Support library for the Avail Ledger Nano S/X app.
//!
//! The device side lives in [`dispatcher`]: it answers APDUs, validates raw
//! signing requests and signs them with key material obtained from a
//! [`keys::KeyStore`]. [`AvailApp`] is the host side, talking to a device
//! through any [`ledger_transport::Exchange`].

#![deny(trivial_casts, trivial_numeric_casts)]
#![deny(unused_import_braces, unused_qualifications)]
#![deny(missing_docs)]
#![doc(html_root_url = "https://docs.rs/ledger-avail/0.1.0")]

use ledger_transport::{APDUAnswer, APDUCommand, Exchange};
use ledger_zondax_generic::LedgerAppError;

pub mod address;
pub mod config;
pub mod digest;
pub mod dispatcher;
pub mod keys;
pub mod keystore;
pub mod params;
pub mod path;
pub mod signer;
pub mod version;

pub use config::AppConfig;
pub use dispatcher::{Dispatcher, State};
pub use keys::KeyKind;
pub use params::StatusWord;
pub use path::DerivationPath;
pub use signer::Signature;
pub use version::TxVersionInfo;

use params::{
    PayloadType, CLA, INS_GET_ADDR, INS_GET_VERSION, INS_SIGN_RAW, PK_LEN_25519,
    USER_MESSAGE_CHUNK_SIZE,
};

/// Avail App Error
#[derive(Debug, thiserror::Error)]
pub enum AvailError<E: std::error::Error> {
    /// Transport or response format errors
    #[error("Ledger | {0}")]
    Ledger(#[from] LedgerAppError<E>),

    /// The app refused the command
    #[error("Device | {0}")]
    Device(StatusWord),
}

/// Avail App
pub struct AvailApp<E: Exchange> {
    transport: E,
    cla: u8,
}

/// Public key and the corresponding SS58 address
pub struct Address {
    /// Public Key
    pub public_key: [u8; PK_LEN_25519],

    /// SS58 address
    pub ss58: String,
}

/// Avail App Version
pub struct Version {
    /// Application Mode
    pub mode: u8,
    /// Version Major
    pub major: u8,
    /// Version Minor
    pub minor: u8,
    /// Version Patch
    pub patch: u8,
}

impl<E> AvailApp<E>
where
    E: Exchange + Send + Sync,
    E::Error: std::error::Error,
{
    /// Talk to the standard app over `transport`
    pub fn new(transport: E) -> Self {
        AvailApp {
            transport,
            cla: CLA,
        }
    }

    /// Talk to the app described by `config`, e.g. the recovery app
    pub fn with_config(transport: E, config: &AppConfig) -> Self {
        AvailApp {
            transport,
            cla: config.cla,
        }
    }

    async fn exchange(
        &self,
        command: APDUCommand<Vec<u8>>,
    ) -> Result<APDUAnswer<E::AnswerType>, AvailError<E::Error>> {
        let response = self
            .transport
            .exchange(&command)
            .await
            .map_err(LedgerAppError::TransportError)?;

        match StatusWord::from_code(response.retcode()) {
            Some(StatusWord::NoError) => Ok(response),
            Some(status) => Err(AvailError::Device(status)),
            None => Err(LedgerAppError::Unknown(response.retcode()).into()),
        }
    }

    /// Retrieve the app version
    pub async fn version(&self) -> Result<Version, AvailError<E::Error>> {
        let command = APDUCommand {
            cla: self.cla,
            ins: INS_GET_VERSION,
            p1: 0x00,
            p2: 0x00,
            data: Vec::new(),
        };

        let response = self.exchange(command).await?;
        let data = response.data();
        if data.len() < 4 {
            return Err(LedgerAppError::InvalidVersion.into());
        }

        Ok(Version {
            mode: data[0],
            major: data[1],
            minor: data[2],
            patch: data[3],
        })
    }

    /// Retrieves the public key and address
    pub async fn address(
        &self,
        path: &DerivationPath,
        kind: KeyKind,
        require_confirmation: bool,
    ) -> Result<Address, AvailError<E::Error>> {
        let command = APDUCommand {
            cla: self.cla,
            ins: INS_GET_ADDR,
            p1: u8::from(require_confirmation),
            p2: kind.tag(),
            data: path.serialize(),
        };

        let response = self.exchange(command).await?;
        let data = response.data();
        if data.len() <= PK_LEN_25519 {
            return Err(LedgerAppError::InvalidPK.into());
        }

        let mut public_key = [0u8; PK_LEN_25519];
        public_key.copy_from_slice(&data[..PK_LEN_25519]);
        let ss58 = std::str::from_utf8(&data[PK_LEN_25519..])
            .map_err(|_| LedgerAppError::Utf8)?
            .to_owned();

        Ok(Address { public_key, ss58 })
    }

    /// Sign a raw transaction. The version header is sent ahead of `blob` and
    /// is covered by the signature.
    pub async fn sign_raw(
        &self,
        path: &DerivationPath,
        kind: KeyKind,
        tx_version: TxVersionInfo,
        blob: &[u8],
    ) -> Result<Signature, AvailError<E::Error>> {
        if blob.is_empty() {
            return Err(LedgerAppError::InvalidEmptyMessage.into());
        }

        let mut message = tx_version.serialize().to_vec();
        message.extend_from_slice(blob);
        let chunks = message.chunks(USER_MESSAGE_CHUNK_SIZE);
        if chunks.len() > 255 {
            return Err(LedgerAppError::InvalidMessageSize.into());
        }
        let packet_count = chunks.len();

        let command = APDUCommand {
            cla: self.cla,
            ins: INS_SIGN_RAW,
            p1: PayloadType::Init as u8,
            p2: kind.tag(),
            data: path.serialize(),
        };
        let mut response = self.exchange(command).await?;

        // Send message chunks
        for (packet_idx, chunk) in chunks.enumerate() {
            let p1 = if packet_idx == packet_count - 1 {
                PayloadType::Last
            } else {
                PayloadType::Add
            };

            let command = APDUCommand {
                cla: self.cla,
                ins: INS_SIGN_RAW,
                p1: p1 as u8,
                p2: kind.tag(),
                data: chunk.to_vec(),
            };
            response = self.exchange(command).await?;
        }

        // Last response should contain the answer
        if response.data().is_empty() {
            return Err(LedgerAppError::NoSignature.into());
        }
        Signature::from_tagged(response.data()).ok_or_else(|| LedgerAppError::InvalidSignature.into())
    }
}
