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
//! App configuration, fixed at startup and shared by reference

use crate::params::{
    CLA, CLA_RECOVERY, COIN_ADDR_TYPE, COIN_AMOUNT_DECIMAL_PLACES, COIN_GENESIS_HASH, COIN_NAME,
    COIN_TICKER, LEDGER_MAJOR_VERSION, LEDGER_MINOR_VERSION, LEDGER_PATCH_VERSION, MAX_SIGN_SIZE,
    MENU_MAIN_APP_LINE1, MENU_MAIN_APP_LINE1_RECOVERY, MENU_MAIN_APP_LINE2,
    SUPPORTED_MINIMUM_SPEC_VERSION, SUPPORTED_TX_VERSION_CURRENT,
};

/// Chain identity of the coin
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoinIdentity {
    /// SS58 address type
    pub address_type: u16,
    /// Hex encoded genesis hash. Informational, signing does not check it.
    pub genesis_hash: &'static str,
    /// Coin name
    pub name: &'static str,
    /// Ticker, including its trailing separator
    pub ticker: &'static str,
    /// Decimals of the native token
    pub decimals: u8,
}

/// Version of the app itself
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AppVersion {
    /// Major
    pub major: u32,
    /// Minor
    pub minor: u32,
    /// Patch
    pub patch: u32,
}

impl std::fmt::Display for AppVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Text shown on the idle screen
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MenuText {
    /// First line
    pub line1: &'static str,
    /// Second line
    pub line2: &'static str,
}

/// Everything the pipeline needs to know about the build it runs in.
///
/// The recovery app differs from the standard one only by its class byte, the
/// extra coin type it accepts and its menu text, so both are values of this
/// struct rather than separate code paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AppConfig {
    /// Class byte answered by this app
    pub cla: u8,
    /// Whether the recovery coin type is accepted in derivation paths
    pub allow_recovery: bool,
    /// Whether sr25519 keys may be requested
    pub sr25519_enabled: bool,
    /// Chain identity
    pub coin: CoinIdentity,
    /// App version
    pub version: AppVersion,
    /// Current transaction version; the one before it is accepted too
    pub tx_version_current: u32,
    /// Oldest accepted spec version
    pub min_spec_version: u32,
    /// Maximum accumulated raw-sign payload
    pub max_sign_size: usize,
    /// Idle screen text
    pub menu: MenuText,
}

const AVAIL: CoinIdentity = CoinIdentity {
    address_type: COIN_ADDR_TYPE,
    genesis_hash: COIN_GENESIS_HASH,
    name: COIN_NAME,
    ticker: COIN_TICKER,
    decimals: COIN_AMOUNT_DECIMAL_PLACES,
};

impl AppConfig {
    /// Standard Avail app
    pub const fn standard() -> Self {
        AppConfig {
            cla: CLA,
            allow_recovery: false,
            sr25519_enabled: cfg!(feature = "sr25519"),
            coin: AVAIL,
            version: AppVersion {
                major: LEDGER_MAJOR_VERSION,
                minor: LEDGER_MINOR_VERSION,
                patch: LEDGER_PATCH_VERSION,
            },
            tx_version_current: SUPPORTED_TX_VERSION_CURRENT,
            min_spec_version: SUPPORTED_MINIMUM_SPEC_VERSION,
            max_sign_size: MAX_SIGN_SIZE,
            menu: MenuText {
                line1: MENU_MAIN_APP_LINE1,
                line2: MENU_MAIN_APP_LINE2,
            },
        }
    }

    /// Recovery app: own class byte, also accepts the Polkadot coin type
    pub const fn recovery() -> Self {
        let mut config = Self::standard();
        config.cla = CLA_RECOVERY;
        config.allow_recovery = true;
        config.menu.line1 = MENU_MAIN_APP_LINE1_RECOVERY;
        config
    }

    /// Configuration selected by the `recovery` cargo feature
    pub const fn for_build() -> Self {
        if cfg!(feature = "recovery") {
            Self::recovery()
        } else {
            Self::standard()
        }
    }

    /// Same configuration with the sr25519 capability switched
    pub const fn with_sr25519(mut self, enabled: bool) -> Self {
        self.sr25519_enabled = enabled;
        self
    }

    /// Transaction version accepted besides the current one, if any
    pub const fn tx_version_previous(&self) -> Option<u32> {
        self.tx_version_current.checked_sub(1)
    }

    /// Second line of the version screen
    pub fn version_line(&self) -> String {
        self.version.to_string()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::for_build()
    }
}
