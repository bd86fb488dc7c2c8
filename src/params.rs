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
//! Protocol and identity constants of the Avail app

/// APDU Class byte
pub const CLA: u8 = 0xbc;
/// APDU Class byte of the recovery app
pub const CLA_RECOVERY: u8 = 0xbe;

/// Instruction: get app version
pub const INS_GET_VERSION: u8 = 0x00;
/// Instruction: get public key and address
pub const INS_GET_ADDR: u8 = 0x01;
/// Instruction: sign raw bytes
pub const INS_SIGN_RAW: u8 = 0x03;

/// Number of components of a derivation path
pub const HDPATH_LEN_DEFAULT: usize = 5;
/// BIP44 hardened derivation flag
pub const HARDENED: u32 = 0x8000_0000;
/// Purpose (44')
pub const HDPATH_0_DEFAULT: u32 = HARDENED | 0x2c;
/// Avail coin type (709')
pub const HDPATH_1_DEFAULT: u32 = HARDENED | 0x2c5;
/// Polkadot coin type (354'), accepted by the recovery app
pub const HDPATH_1_RECOVERY: u32 = HARDENED | 0x162;
/// Default account
pub const HDPATH_2_DEFAULT: u32 = HARDENED;
/// Default change
pub const HDPATH_3_DEFAULT: u32 = 0;
/// Default address index
pub const HDPATH_4_DEFAULT: u32 = 0;

/// Length of the serialized derivation path
pub const HDPATH_SERIALIZED_LEN: usize = HDPATH_LEN_DEFAULT * 4;

/// Private key buffer length (key || chain code)
pub const SK_LEN_25519: usize = 64;
/// Length of the signing secret inside the private key buffer
pub const SCALAR_LEN_ED25519: usize = 32;
/// Public key length
pub const PK_LEN_25519: usize = 32;
/// Raw signature length
pub const SIG_LEN_25519: usize = 64;
/// Signature plus key kind tag
pub const SIG_PLUS_TYPE_LEN: usize = SIG_LEN_25519 + 1;
/// Response buffer ceiling for signatures
pub const MAX_SIGNATURE_BUFFER: usize = 256;

/// Maximum accumulated payload of a raw signing request
pub const MAX_SIGN_SIZE: usize = 256;
/// BLAKE2b digest length
pub const BLAKE2B_DIGEST_SIZE: usize = 32;
/// Version header: tx version (u32 LE) || spec version (u32 LE)
pub const VERSION_HEADER_LEN: usize = 8;

/// Chunk size used by the host when streaming a message
pub const USER_MESSAGE_CHUNK_SIZE: usize = 250;

/// App version
pub const LEDGER_MAJOR_VERSION: u32 = 3;
/// App minor version, doubles as the supported spec version
pub const LEDGER_MINOR_VERSION: u32 = 28;
/// App patch version
pub const LEDGER_PATCH_VERSION: u32 = 0;

/// Current transaction version
pub const SUPPORTED_TX_VERSION_CURRENT: u32 = LEDGER_MAJOR_VERSION;
/// Previous transaction version
pub const SUPPORTED_TX_VERSION_PREVIOUS: u32 = LEDGER_MAJOR_VERSION - 1;
/// Supported spec version
pub const SUPPORTED_SPEC_VERSION: u32 = LEDGER_MINOR_VERSION;
/// Oldest spec version accepted
pub const SUPPORTED_MINIMUM_SPEC_VERSION: u32 = 22;

/// SS58 address type
pub const COIN_ADDR_TYPE: u16 = 42;
/// Decimals of the native token
pub const COIN_AMOUNT_DECIMAL_PLACES: u8 = 18;
/// Genesis hash of the Avail chain
pub const COIN_GENESIS_HASH: &str =
    "b91746b45e0346cc2f815a520b9c6cb4d5c0902af848db0a80f85932d2e8276a";
/// Coin name
pub const COIN_NAME: &str = "Avail";
/// Coin ticker
pub const COIN_TICKER: &str = "AVAIL ";

/// Main menu text
pub const MENU_MAIN_APP_LINE1: &str = "Avail";
/// Main menu text of the recovery app
pub const MENU_MAIN_APP_LINE1_RECOVERY: &str = "Avail Recovery";
/// Main menu status line
pub const MENU_MAIN_APP_LINE2: &str = "Ready";

/// Chunk type carried in P1 of a streamed instruction
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayloadType {
    /// First chunk, carries the derivation path
    Init = 0x00,
    /// Intermediate chunk
    Add = 0x01,
    /// Final chunk
    Last = 0x02,
}

impl TryFrom<u8> for PayloadType {
    type Error = u8;

    fn try_from(p1: u8) -> Result<Self, Self::Error> {
        match p1 {
            0x00 => Ok(PayloadType::Init),
            0x01 => Ok(PayloadType::Add),
            0x02 => Ok(PayloadType::Last),
            other => Err(other),
        }
    }
}

/// Status words answered by the app
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusWord {
    /// Success
    NoError = 0x9000,
    /// Internal failure that is not the caller's fault
    ExecutionError = 0x6400,
    /// Malformed payload length
    WrongLength = 0x6700,
    /// Another command is in flight
    DeviceBusy = 0x6985,
    /// The user rejected the request
    Rejected = 0x6986,
    /// Derivation path does not have 5 components
    InvalidDepth = 0x6a80,
    /// Derivation path purpose is not 44'
    InvalidPurpose = 0x6a81,
    /// Derivation path coin type is not accepted
    InvalidCoinType = 0x6a82,
    /// Transaction version is not supported
    UnsupportedMajor = 0x6a83,
    /// Spec version is below the minimum
    UnsupportedSpec = 0x6a84,
    /// Accumulated payload exceeds the maximum sign size
    PayloadTooLarge = 0x6a85,
    /// Key kind not available in this build
    UnsupportedKeyKind = 0x6a86,
    /// Invalid P1 or P2
    InvalidP1P2 = 0x6b00,
    /// Unknown instruction
    InsNotSupported = 0x6d00,
    /// Unknown class
    ClaNotSupported = 0x6e00,
    /// Signature primitive failed
    SigningFailed = 0x6f01,
    /// Key storage failed
    DerivationFailed = 0x6f02,
}

impl StatusWord {
    const ALL: [StatusWord; 17] = [
        StatusWord::NoError,
        StatusWord::ExecutionError,
        StatusWord::WrongLength,
        StatusWord::DeviceBusy,
        StatusWord::Rejected,
        StatusWord::InvalidDepth,
        StatusWord::InvalidPurpose,
        StatusWord::InvalidCoinType,
        StatusWord::UnsupportedMajor,
        StatusWord::UnsupportedSpec,
        StatusWord::PayloadTooLarge,
        StatusWord::UnsupportedKeyKind,
        StatusWord::InvalidP1P2,
        StatusWord::InsNotSupported,
        StatusWord::ClaNotSupported,
        StatusWord::SigningFailed,
        StatusWord::DerivationFailed,
    ];

    /// Look up a status word received from the device
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|sw| *sw as u16 == code)
    }

    /// Key and signing failures point at the device rather than the request
    pub fn is_device_fault(self) -> bool {
        matches!(self, StatusWord::SigningFailed | StatusWord::DerivationFailed)
    }
}

impl std::fmt::Display for StatusWord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} ({:#06x})", self, *self as u16)
    }
}
