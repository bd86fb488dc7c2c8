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
//! Command dispatcher: the state machine that answers APDUs.
//!
//! A raw signing request walks through
//! `Idle -> ReceivingPayload -> Validating -> Signing -> Responding -> Idle`,
//! detouring through `Error` on any failure. Only one request is in flight;
//! anything else received meanwhile is answered with `DeviceBusy`.
//!
//! The machine is stepped explicitly. [`Dispatcher::submit`] takes a command
//! and either answers it right away or accepts the request for processing, in
//! which case [`Dispatcher::advance`] performs one transition per call until
//! the answer is ready. [`Dispatcher::process`] does both.

use std::ops::Deref;

use ledger_transport::APDUCommand;
use log::{debug, warn};
use zeroize::Zeroizing;

use crate::address::{ss58_encode, AddressError};
use crate::config::AppConfig;
use crate::digest;
use crate::keys::{self, KeyError, KeyKind, KeyStore};
use crate::params::{PayloadType, StatusWord, INS_GET_ADDR, INS_GET_VERSION, INS_SIGN_RAW};
use crate::path::{self, DerivationPath, PathError, ValidatedPath};
use crate::signer::{self, SignError, Signature};
use crate::version::{self, TxVersionInfo, VersionError};

/// Dispatcher states
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Waiting for a command
    Idle,
    /// Accumulating the chunks of a raw signing request
    ReceivingPayload,
    /// Checking path, versions and user approval
    Validating,
    /// Deriving the key and signing
    Signing,
    /// Signature ready to be answered
    Responding,
    /// Failure ready to be answered
    Error,
}

/// Reasons a command is refused
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Bad derivation path
    #[error(transparent)]
    Path(#[from] PathError),

    /// Unsupported transaction versions
    #[error(transparent)]
    Version(#[from] VersionError),

    /// Key derivation failure
    #[error(transparent)]
    Key(#[from] KeyError),

    /// Signing failure
    #[error(transparent)]
    Sign(#[from] SignError),

    /// Address encoding failure
    #[error(transparent)]
    Address(#[from] AddressError),

    /// Accumulated payload is larger than the maximum sign size
    #[error("payload of {0} bytes is too large")]
    PayloadTooLarge(usize),

    /// Another command is in flight
    #[error("device is busy")]
    DeviceBusy,

    /// The user declined
    #[error("rejected by the user")]
    Rejected,

    /// Missing version header or empty transaction
    #[error("invalid payload length")]
    WrongLength,

    /// Unknown chunk type, key kind or flag
    #[error("invalid P1/P2")]
    InvalidP1P2,

    /// Unknown instruction
    #[error("instruction {0:#04x} not supported")]
    InsNotSupported(u8),

    /// Unknown class
    #[error("class {0:#04x} not supported")]
    ClaNotSupported(u8),

    /// The dispatcher lost track of its in-flight request
    #[error("no request in flight")]
    NothingInFlight,
}

impl DispatchError {
    /// Status word answered for this error
    pub fn status_word(&self) -> StatusWord {
        match self {
            DispatchError::Path(PathError::InvalidDepth(_)) => StatusWord::InvalidDepth,
            DispatchError::Path(PathError::InvalidPurpose(_)) => StatusWord::InvalidPurpose,
            DispatchError::Path(PathError::InvalidCoinType(_)) => StatusWord::InvalidCoinType,
            DispatchError::Path(PathError::Malformed(_)) => StatusWord::WrongLength,
            DispatchError::Version(VersionError::UnsupportedMajor(_)) => {
                StatusWord::UnsupportedMajor
            }
            DispatchError::Version(VersionError::UnsupportedSpec(_)) => StatusWord::UnsupportedSpec,
            DispatchError::Key(KeyError::UnsupportedKeyKind(_)) => StatusWord::UnsupportedKeyKind,
            DispatchError::Key(KeyError::DerivationFailed(_)) => StatusWord::DerivationFailed,
            DispatchError::Sign(SignError::SigningFailed(_)) => StatusWord::SigningFailed,
            DispatchError::Address(_) | DispatchError::NothingInFlight => StatusWord::ExecutionError,
            DispatchError::PayloadTooLarge(_) => StatusWord::PayloadTooLarge,
            DispatchError::DeviceBusy => StatusWord::DeviceBusy,
            DispatchError::Rejected => StatusWord::Rejected,
            DispatchError::WrongLength => StatusWord::WrongLength,
            DispatchError::InvalidP1P2 => StatusWord::InvalidP1P2,
            DispatchError::InsNotSupported(_) => StatusWord::InsNotSupported,
            DispatchError::ClaNotSupported(_) => StatusWord::ClaNotSupported,
        }
    }
}

/// Answer to a command
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    /// Answer data
    pub data: Vec<u8>,
    /// Status word
    pub status: StatusWord,
}

impl Response {
    fn ok(data: Vec<u8>) -> Self {
        Response {
            data,
            status: StatusWord::NoError,
        }
    }

    fn from_error(err: &DispatchError) -> Self {
        Response {
            data: Vec::new(),
            status: err.status_word(),
        }
    }

    /// `data || status word`, as sent over the wire
    pub fn into_bytes(self) -> Vec<u8> {
        let mut bytes = self.data;
        bytes.extend_from_slice(&(self.status as u16).to_be_bytes());
        bytes
    }
}

/// What the user is asked to approve
#[derive(Clone, Copy, Debug)]
pub enum Summary<'r> {
    /// Raw signing request
    Sign {
        /// Signing path
        path: &'r ValidatedPath,
        /// Key kind
        kind: KeyKind,
        /// Declared versions
        version: TxVersionInfo,
        /// Transaction length
        tx_len: usize,
    },
    /// Address display
    Address {
        /// Derivation path
        path: &'r ValidatedPath,
        /// SS58 address
        address: &'r str,
    },
}

/// User decision
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Approval {
    /// Go ahead
    Accepted,
    /// Abort the request
    Rejected,
}

/// On-device confirmation
pub trait Approver {
    /// Show `summary` and wait for the user's decision
    fn confirm(&mut self, summary: &Summary<'_>) -> Approval;
}

/// Approves everything. For emulators and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct AutoApprove;

impl Approver for AutoApprove {
    fn confirm(&mut self, _summary: &Summary<'_>) -> Approval {
        Approval::Accepted
    }
}

/// Link the commands come from
pub trait Transport {
    /// Transport error
    type Error;

    /// Next command, or `None` once the link is closed. May block.
    fn receive(&mut self) -> Result<Option<APDUCommand<Vec<u8>>>, Self::Error>;

    /// Send an answer
    fn send(&mut self, answer: &[u8]) -> Result<(), Self::Error>;
}

struct InFlight {
    kind: KeyKind,
    path: Zeroizing<Vec<u8>>,
    message: Zeroizing<Vec<u8>>,
    validated: Option<ValidatedPath>,
    signature: Option<Signature>,
}

impl InFlight {
    fn len(&self) -> usize {
        self.path.len() + self.message.len()
    }
}

/// The command dispatcher
pub struct Dispatcher<'a, K, A> {
    config: &'a AppConfig,
    keystore: K,
    approver: A,
    state: State,
    in_flight: Option<InFlight>,
    failure: Option<DispatchError>,
}

impl<'a, K, A> Dispatcher<'a, K, A>
where
    K: KeyStore,
    A: Approver,
{
    /// Idle dispatcher
    pub fn new(config: &'a AppConfig, keystore: K, approver: A) -> Self {
        Dispatcher {
            config,
            keystore,
            approver,
            state: State::Idle,
            in_flight: None,
            failure: None,
        }
    }

    /// Current state
    pub fn state(&self) -> State {
        self.state
    }

    /// Configuration in use
    pub fn config(&self) -> &AppConfig {
        self.config
    }

    /// Bytes buffered for the in-flight request
    pub fn buffered(&self) -> usize {
        self.in_flight.as_ref().map_or(0, InFlight::len)
    }

    /// Take a command. Returns the answer, or `None` when the command started
    /// processing that [`Dispatcher::advance`] has to finish.
    pub fn submit<I>(&mut self, command: &APDUCommand<I>) -> Option<Response>
    where
        I: Deref<Target = [u8]>,
    {
        match self.state {
            State::Idle => self.accept(command),
            State::ReceivingPayload => match self.continuation(command) {
                Some(_) if !self.same_kind(command.p2) => {
                    self.enter_error(DispatchError::InvalidP1P2);
                    self.advance()
                }
                Some(payload_type) => self.receive_chunk(&command.data, payload_type),
                None => Some(self.busy()),
            },
            _ => Some(self.busy()),
        }
    }

    /// Perform one transition. Returns the answer once the request is done.
    pub fn advance(&mut self) -> Option<Response> {
        match self.state {
            State::Idle | State::ReceivingPayload => None,
            State::Validating => {
                match self.validate() {
                    Ok(()) => self.transition(State::Signing),
                    Err(err) => self.enter_error(err),
                }
                None
            }
            State::Signing => {
                match self.sign() {
                    Ok(signature) => {
                        if let Some(in_flight) = self.in_flight.as_mut() {
                            in_flight.signature = Some(signature);
                        }
                        self.transition(State::Responding);
                    }
                    Err(err) => self.enter_error(err),
                }
                None
            }
            State::Responding => {
                let signature = self.in_flight.take().and_then(|f| f.signature);
                self.transition(State::Idle);
                match signature {
                    Some(signature) => Some(Response::ok(signature.to_bytes().to_vec())),
                    None => Some(Response::from_error(&DispatchError::NothingInFlight)),
                }
            }
            State::Error => {
                let err = self.failure.take().unwrap_or(DispatchError::NothingInFlight);
                self.in_flight = None;
                self.transition(State::Idle);
                Some(Response::from_error(&err))
            }
        }
    }

    /// Submit a command and run it to completion
    pub fn process<I>(&mut self, command: &APDUCommand<I>) -> Response
    where
        I: Deref<Target = [u8]>,
    {
        if let Some(response) = self.submit(command) {
            return response;
        }
        while !matches!(self.state, State::Idle | State::ReceivingPayload) {
            if let Some(response) = self.advance() {
                return response;
            }
        }
        Response::from_error(&DispatchError::NothingInFlight)
    }

    /// Answer commands from `transport` until it closes
    pub fn serve<T: Transport>(&mut self, transport: &mut T) -> Result<(), T::Error> {
        while let Some(command) = transport.receive()? {
            let response = self.process(&command);
            transport.send(&response.into_bytes())?;
        }
        self.reset();
        Ok(())
    }

    /// Drop the in-flight request, if any, and go back to `Idle`
    pub fn reset(&mut self) {
        if self.in_flight.take().is_some() {
            debug!("in-flight request discarded");
        }
        self.failure = None;
        self.transition(State::Idle);
    }

    fn transition(&mut self, next: State) {
        if self.state != next {
            debug!("{:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn enter_error(&mut self, err: DispatchError) {
        if err.status_word().is_device_fault() {
            warn!("request failed: {}", err);
        } else {
            debug!("request refused: {}", err);
        }
        // buffers are erased on drop
        self.in_flight = None;
        self.failure = Some(err);
        self.transition(State::Error);
    }

    fn busy(&self) -> Response {
        debug!("command refused while {:?}", self.state);
        Response::from_error(&DispatchError::DeviceBusy)
    }

    fn refuse(&self, err: DispatchError) -> Option<Response> {
        debug!("command refused: {}", err);
        Some(Response::from_error(&err))
    }

    fn continuation<I>(&self, command: &APDUCommand<I>) -> Option<PayloadType>
    where
        I: Deref<Target = [u8]>,
    {
        if command.cla != self.config.cla || command.ins != INS_SIGN_RAW {
            return None;
        }
        match PayloadType::try_from(command.p1) {
            Ok(payload_type @ (PayloadType::Add | PayloadType::Last)) => Some(payload_type),
            _ => None,
        }
    }

    // every chunk repeats the key kind chosen at `Init`
    fn same_kind(&self, p2: u8) -> bool {
        self.in_flight
            .as_ref()
            .map_or(false, |in_flight| in_flight.kind.tag() == p2)
    }

    fn accept<I>(&mut self, command: &APDUCommand<I>) -> Option<Response>
    where
        I: Deref<Target = [u8]>,
    {
        if command.cla != self.config.cla {
            return self.refuse(DispatchError::ClaNotSupported(command.cla));
        }

        match command.ins {
            INS_GET_VERSION => Some(self.version_response()),
            INS_GET_ADDR => match self.address(command) {
                Ok(response) => Some(response),
                Err(err) => self.refuse(err),
            },
            INS_SIGN_RAW => self.start_sign(command),
            ins => self.refuse(DispatchError::InsNotSupported(ins)),
        }
    }

    fn version_response(&self) -> Response {
        let version = self.config.version;
        let byte = |v: u32| u8::try_from(v).unwrap_or(u8::MAX);
        Response::ok(vec![
            0x00,
            byte(version.major),
            byte(version.minor),
            byte(version.patch),
        ])
    }

    fn address<I>(&mut self, command: &APDUCommand<I>) -> Result<Response, DispatchError>
    where
        I: Deref<Target = [u8]>,
    {
        let require_confirmation = match command.p1 {
            0 => false,
            1 => true,
            _ => return Err(DispatchError::InvalidP1P2),
        };
        let kind = KeyKind::try_from(command.p2).map_err(|_| DispatchError::InvalidP1P2)?;

        let requested = DerivationPath::from_bytes(&command.data)?;
        let path = path::validate(&requested, self.config.allow_recovery)?;

        let key = keys::derive(self.config, &mut self.keystore, &path, kind)?;
        let public_key = signer::public_key(&key)?;
        drop(key);

        let address = ss58_encode(self.config.coin.address_type, &public_key)?;
        if require_confirmation {
            let summary = Summary::Address {
                path: &path,
                address: &address,
            };
            if self.approver.confirm(&summary) == Approval::Rejected {
                return Err(DispatchError::Rejected);
            }
        }

        let mut data = public_key.to_vec();
        data.extend_from_slice(address.as_bytes());
        Ok(Response::ok(data))
    }

    fn start_sign<I>(&mut self, command: &APDUCommand<I>) -> Option<Response>
    where
        I: Deref<Target = [u8]>,
    {
        if PayloadType::try_from(command.p1) != Ok(PayloadType::Init) {
            return self.refuse(DispatchError::InvalidP1P2);
        }
        let kind = match KeyKind::try_from(command.p2) {
            Ok(kind) => kind,
            Err(_) => return self.refuse(DispatchError::InvalidP1P2),
        };
        if command.data.len() > self.config.max_sign_size {
            return self.refuse(DispatchError::PayloadTooLarge(command.data.len()));
        }

        self.in_flight = Some(InFlight {
            kind,
            path: Zeroizing::new(command.data.to_vec()),
            message: Zeroizing::new(Vec::new()),
            validated: None,
            signature: None,
        });
        self.transition(State::ReceivingPayload);
        Some(Response::ok(Vec::new()))
    }

    fn receive_chunk(&mut self, chunk: &[u8], payload_type: PayloadType) -> Option<Response> {
        let max_sign_size = self.config.max_sign_size;
        let in_flight = match self.in_flight.as_mut() {
            Some(in_flight) => in_flight,
            None => {
                self.enter_error(DispatchError::NothingInFlight);
                return self.advance();
            }
        };

        let total = in_flight.len() + chunk.len();
        if total > max_sign_size {
            self.enter_error(DispatchError::PayloadTooLarge(total));
            return self.advance();
        }
        in_flight.message.extend_from_slice(chunk);

        match payload_type {
            PayloadType::Last => {
                self.transition(State::Validating);
                None
            }
            _ => Some(Response::ok(Vec::new())),
        }
    }

    fn validate(&mut self) -> Result<(), DispatchError> {
        let in_flight = self
            .in_flight
            .as_mut()
            .ok_or(DispatchError::NothingInFlight)?;

        let requested = DerivationPath::from_bytes(&in_flight.path)?;
        let path = path::validate(&requested, self.config.allow_recovery)?;

        let (tx_version, tx) =
            TxVersionInfo::parse(&in_flight.message).ok_or(DispatchError::WrongLength)?;
        if tx.is_empty() {
            return Err(DispatchError::WrongLength);
        }
        version::check(self.config, tx_version)?;

        let summary = Summary::Sign {
            path: &path,
            kind: in_flight.kind,
            version: tx_version,
            tx_len: tx.len(),
        };
        if self.approver.confirm(&summary) == Approval::Rejected {
            return Err(DispatchError::Rejected);
        }

        in_flight.validated = Some(path);
        Ok(())
    }

    fn sign(&mut self) -> Result<Signature, DispatchError> {
        let in_flight = self
            .in_flight
            .as_ref()
            .ok_or(DispatchError::NothingInFlight)?;
        let path = in_flight
            .validated
            .as_ref()
            .ok_or(DispatchError::NothingInFlight)?;

        let key = keys::derive(self.config, &mut self.keystore, path, in_flight.kind)?;
        let digest = digest::hash(&in_flight.message);
        let signature = signer::sign(&key, &digest)?;
        Ok(signature)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use ed25519_dalek::{Verifier, VerifyingKey};
    use ledger_transport::APDUCommand;

    use super::{
        Approval, Approver, AutoApprove, DispatchError, Dispatcher, Response, State, Summary,
        Transport,
    };
    use crate::address::ss58_encode;
    use crate::config::AppConfig;
    use crate::digest::hash;
    use crate::keys::tests::FixedKeyStore;
    use crate::keys::{KeyError, KeyStoreError};
    use crate::keystore::SoftwareKeyStore;
    use crate::params::{
        PayloadType, StatusWord, CLA, CLA_RECOVERY, HARDENED, HDPATH_1_RECOVERY,
        HDPATH_SERIALIZED_LEN, INS_GET_ADDR, INS_GET_VERSION, INS_SIGN_RAW,
    };
    use crate::path::DerivationPath;
    use crate::signer::SignError;
    use crate::version::TxVersionInfo;

    static STANDARD: AppConfig = AppConfig::standard();

    struct CountingApprover {
        calls: Rc<Cell<usize>>,
        reject: bool,
    }

    impl Approver for CountingApprover {
        fn confirm(&mut self, _summary: &Summary<'_>) -> Approval {
            self.calls.set(self.calls.get() + 1);
            if self.reject {
                Approval::Rejected
            } else {
                Approval::Accepted
            }
        }
    }

    fn apdu(cla: u8, ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> APDUCommand<Vec<u8>> {
        APDUCommand {
            cla,
            ins,
            p1,
            p2,
            data,
        }
    }

    fn init(path: &DerivationPath) -> APDUCommand<Vec<u8>> {
        apdu(CLA, INS_SIGN_RAW, PayloadType::Init as u8, 0, path.serialize())
    }

    fn chunk(payload_type: PayloadType, data: Vec<u8>) -> APDUCommand<Vec<u8>> {
        apdu(CLA, INS_SIGN_RAW, payload_type as u8, 0, data)
    }

    fn message(major: u32, minor: u32, tx: &[u8]) -> Vec<u8> {
        let mut data = TxVersionInfo { major, minor }.serialize().to_vec();
        data.extend_from_slice(tx);
        data
    }

    fn scenario_path() -> DerivationPath {
        DerivationPath::new(vec![0x8000_002c, 0x8000_02c5, 0x8000_0000, 0, 0])
    }

    fn counting() -> Dispatcher<'static, FixedKeyStore, AutoApprove> {
        Dispatcher::new(&STANDARD, FixedKeyStore::new(), AutoApprove)
    }

    fn software() -> Dispatcher<'static, SoftwareKeyStore, AutoApprove> {
        Dispatcher::new(&STANDARD, SoftwareKeyStore::new(&[0x42; 32]), AutoApprove)
    }

    fn public_key<K: crate::keys::KeyStore, A: Approver>(
        dispatcher: &mut Dispatcher<'_, K, A>,
        path: &DerivationPath,
    ) -> [u8; 32] {
        let response = dispatcher.process(&apdu(CLA, INS_GET_ADDR, 0, 0, path.serialize()));
        assert_eq!(response.status, StatusWord::NoError);
        let mut pk = [0u8; 32];
        pk.copy_from_slice(&response.data[..32]);
        pk
    }

    #[test]
    fn signs_raw_transaction() {
        let mut dispatcher = software();
        let current = STANDARD.tx_version_current;
        let msg = message(current, 22, b"\x04\x03remark");

        let ack = dispatcher.process(&init(&scenario_path()));
        assert_eq!(ack, Response { data: vec![], status: StatusWord::NoError });
        assert_eq!(dispatcher.state(), State::ReceivingPayload);

        let response = dispatcher.process(&chunk(PayloadType::Last, msg.clone()));
        assert_eq!(response.status, StatusWord::NoError);
        assert_eq!(response.data.len(), 65);
        assert_eq!(response.data[0], 0);
        assert_eq!(dispatcher.state(), State::Idle);
        assert_eq!(dispatcher.buffered(), 0);

        let pk = public_key(&mut dispatcher, &scenario_path());
        let verifying_key = VerifyingKey::from_bytes(&pk).unwrap();
        let mut sig = [0u8; 64];
        sig.copy_from_slice(&response.data[1..]);
        let sig = ed25519_dalek::Signature::from_bytes(&sig);
        assert!(verifying_key.verify(hash(&msg).as_ref(), &sig).is_ok());
    }

    #[test]
    fn walks_through_every_state() {
        let mut dispatcher = counting();
        let current = STANDARD.tx_version_current;

        assert!(dispatcher.submit(&init(&scenario_path())).is_some());
        assert!(dispatcher
            .submit(&chunk(PayloadType::Add, message(current, 22, b"ab")))
            .is_some());
        assert!(dispatcher.submit(&chunk(PayloadType::Last, b"cd".to_vec())).is_none());
        assert_eq!(dispatcher.state(), State::Validating);

        assert!(dispatcher.advance().is_none());
        assert_eq!(dispatcher.state(), State::Signing);
        assert!(dispatcher.advance().is_none());
        assert_eq!(dispatcher.state(), State::Responding);

        let response = dispatcher.advance().unwrap();
        assert_eq!(response.status, StatusWord::NoError);
        assert_eq!(dispatcher.state(), State::Idle);
        assert!(dispatcher.advance().is_none());
    }

    #[test]
    fn bad_coin_type_never_touches_keys() {
        let mut dispatcher = counting();
        let calls = dispatcher.keystore.calls.clone();
        let path = DerivationPath::new(vec![0x8000_002c, HARDENED | 0x1b2, HARDENED, 0, 0]);

        dispatcher.process(&init(&path));
        let response = dispatcher.process(&chunk(
            PayloadType::Last,
            message(STANDARD.tx_version_current, 22, b"tx"),
        ));

        assert_eq!(response.status, StatusWord::InvalidCoinType);
        assert_eq!(dispatcher.state(), State::Idle);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn old_transaction_version_never_touches_keys() {
        let mut dispatcher = counting();
        let calls = dispatcher.keystore.calls.clone();

        dispatcher.process(&init(&scenario_path()));
        let response = dispatcher.process(&chunk(
            PayloadType::Last,
            message(STANDARD.tx_version_current - 2, 22, b"tx"),
        ));

        assert_eq!(response.status, StatusWord::UnsupportedMajor);
        assert_eq!(dispatcher.state(), State::Idle);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn spec_below_minimum() {
        let mut dispatcher = counting();
        dispatcher.process(&init(&scenario_path()));
        let response = dispatcher.process(&chunk(
            PayloadType::Last,
            message(STANDARD.tx_version_current - 1, 21, b"tx"),
        ));
        assert_eq!(response.status, StatusWord::UnsupportedSpec);
    }

    #[test]
    fn busy_while_signing() {
        let mut dispatcher = counting();
        let msg = message(STANDARD.tx_version_current, 22, b"tx");

        dispatcher.submit(&init(&scenario_path()));
        assert!(dispatcher.submit(&chunk(PayloadType::Last, msg)).is_none());
        dispatcher.advance();
        assert_eq!(dispatcher.state(), State::Signing);
        let buffered = dispatcher.buffered();

        for intruder in [
            init(&scenario_path()),
            chunk(PayloadType::Last, b"more".to_vec()),
            apdu(CLA, INS_GET_VERSION, 0, 0, vec![]),
        ] {
            let response = dispatcher.submit(&intruder).unwrap();
            assert_eq!(response.status, StatusWord::DeviceBusy);
            assert_eq!(dispatcher.state(), State::Signing);
            assert_eq!(dispatcher.buffered(), buffered);
        }

        assert!(dispatcher.advance().is_none());
        let response = dispatcher.advance().unwrap();
        assert_eq!(response.status, StatusWord::NoError);
        assert_eq!(response.data.len(), 65);
    }

    #[test]
    fn busy_while_receiving() {
        let mut dispatcher = counting();
        dispatcher.process(&init(&scenario_path()));

        let response = dispatcher.process(&apdu(CLA, INS_GET_VERSION, 0, 0, vec![]));
        assert_eq!(response.status, StatusWord::DeviceBusy);
        let response = dispatcher.process(&init(&scenario_path()));
        assert_eq!(response.status, StatusWord::DeviceBusy);
        assert_eq!(dispatcher.state(), State::ReceivingPayload);
        assert_eq!(dispatcher.buffered(), HDPATH_SERIALIZED_LEN);

        dispatcher.reset();
        assert_eq!(dispatcher.state(), State::Idle);
        assert_eq!(dispatcher.buffered(), 0);
    }

    #[test]
    fn payload_too_large() {
        let mut dispatcher = counting();
        let calls = dispatcher.keystore.calls.clone();

        dispatcher.process(&init(&scenario_path()));
        let response = dispatcher.process(&chunk(PayloadType::Add, vec![0u8; 200]));
        assert_eq!(response.status, StatusWord::NoError);
        assert_eq!(dispatcher.buffered(), 220);

        let response = dispatcher.process(&chunk(PayloadType::Last, vec![0u8; 37]));
        assert_eq!(response.status, StatusWord::PayloadTooLarge);
        assert_eq!(dispatcher.state(), State::Idle);
        assert_eq!(dispatcher.buffered(), 0);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn payload_at_limit() {
        let mut dispatcher = counting();
        dispatcher.process(&init(&scenario_path()));
        let tx = vec![0u8; 256 - 20 - 8];
        let response = dispatcher.process(&chunk(
            PayloadType::Last,
            message(STANDARD.tx_version_current, 22, &tx),
        ));
        assert_eq!(response.status, StatusWord::NoError);
    }

    #[test]
    fn malformed_requests() {
        let mut dispatcher = counting();

        let response = dispatcher.process(&chunk(PayloadType::Add, b"tx".to_vec()));
        assert_eq!(response.status, StatusWord::InvalidP1P2);

        let response = dispatcher.process(&apdu(CLA, INS_SIGN_RAW, 0, 7, vec![]));
        assert_eq!(response.status, StatusWord::InvalidP1P2);

        let response = dispatcher.process(&apdu(0xe0, INS_SIGN_RAW, 0, 0, vec![]));
        assert_eq!(response.status, StatusWord::ClaNotSupported);

        let response = dispatcher.process(&apdu(CLA, 0x02, 0, 0, vec![]));
        assert_eq!(response.status, StatusWord::InsNotSupported);

        dispatcher.process(&init(&scenario_path()));
        let response = dispatcher.process(&chunk(PayloadType::Last, vec![3, 0, 0]));
        assert_eq!(response.status, StatusWord::WrongLength);

        dispatcher.process(&init(&scenario_path()));
        let response = dispatcher.process(&chunk(
            PayloadType::Last,
            message(STANDARD.tx_version_current, 22, b""),
        ));
        assert_eq!(response.status, StatusWord::WrongLength);

        dispatcher.process(&apdu(CLA, INS_SIGN_RAW, 0, 0, vec![0u8; 19]));
        let response = dispatcher.process(&chunk(
            PayloadType::Last,
            message(STANDARD.tx_version_current, 22, b"tx"),
        ));
        assert_eq!(response.status, StatusWord::WrongLength);

        let short = DerivationPath::new(vec![0x8000_002c, 0x8000_02c5, 0, 0]);
        dispatcher.process(&init(&short));
        let response = dispatcher.process(&chunk(
            PayloadType::Last,
            message(STANDARD.tx_version_current, 22, b"tx"),
        ));
        assert_eq!(response.status, StatusWord::InvalidDepth);

        let bad_purpose = DerivationPath::new(vec![0x8000_0031, 0x8000_02c5, 0, 0, 0]);
        dispatcher.process(&init(&bad_purpose));
        let response = dispatcher.process(&chunk(
            PayloadType::Last,
            message(STANDARD.tx_version_current, 22, b"tx"),
        ));
        assert_eq!(response.status, StatusWord::InvalidPurpose);

        assert_eq!(dispatcher.keystore.calls.get(), 0);
        assert_eq!(dispatcher.state(), State::Idle);
    }

    #[test]
    fn rejection_happens_before_signing() {
        let approvals = Rc::new(Cell::new(0));
        let approver = CountingApprover {
            calls: approvals.clone(),
            reject: true,
        };
        let keystore = FixedKeyStore::new();
        let calls = keystore.calls.clone();
        let mut dispatcher = Dispatcher::new(&STANDARD, keystore, approver);

        dispatcher.process(&init(&scenario_path()));
        let response = dispatcher.process(&chunk(
            PayloadType::Last,
            message(STANDARD.tx_version_current, 22, b"tx"),
        ));

        assert_eq!(response.status, StatusWord::Rejected);
        assert_eq!(approvals.get(), 1);
        assert_eq!(calls.get(), 0);
        assert_eq!(dispatcher.state(), State::Idle);
    }

    #[test]
    fn key_kind_switch_mid_stream_is_refused() {
        let mut dispatcher = counting();
        let msg = message(STANDARD.tx_version_current, 22, b"tx");

        dispatcher.process(&init(&scenario_path()));
        let response = dispatcher.process(&chunk(PayloadType::Add, msg[..4].to_vec()));
        assert_eq!(response.status, StatusWord::NoError);

        let response = dispatcher.process(&apdu(CLA, INS_SIGN_RAW, 2, 1, msg[4..].to_vec()));
        assert_eq!(response.status, StatusWord::InvalidP1P2);
        assert_eq!(dispatcher.state(), State::Idle);
        assert_eq!(dispatcher.buffered(), 0);
        assert_eq!(dispatcher.keystore.calls.get(), 0);
    }

    #[test]
    fn signing_failure_is_distinct_device_fault() {
        let err = DispatchError::Sign(SignError::SigningFailed("bad scalar".to_string()));
        assert_eq!(err.status_word(), StatusWord::SigningFailed);
        assert_eq!(err.status_word() as u16, 0x6F01);
        assert!(err.status_word().is_device_fault());

        let derivation = DispatchError::Key(KeyError::DerivationFailed(KeyStoreError(
            "no seed".to_string(),
        )));
        assert_eq!(derivation.status_word(), StatusWord::DerivationFailed);
        assert_ne!(err.status_word(), derivation.status_word());
    }

    #[test]
    fn derivation_failure_is_device_fault() {
        let mut dispatcher = counting();
        dispatcher.keystore.fail = true;

        dispatcher.process(&init(&scenario_path()));
        let response = dispatcher.process(&chunk(
            PayloadType::Last,
            message(STANDARD.tx_version_current, 22, b"tx"),
        ));
        assert_eq!(response.status, StatusWord::DerivationFailed);
        assert!(response.status.is_device_fault());
        assert_eq!(dispatcher.state(), State::Idle);
    }

    #[test]
    fn sr25519_depends_on_capability() {
        static WITHOUT: AppConfig = AppConfig::standard().with_sr25519(false);
        static WITH: AppConfig = AppConfig::standard().with_sr25519(true);
        let msg = message(STANDARD.tx_version_current, 22, b"tx");
        let sr25519_init = apdu(CLA, INS_SIGN_RAW, 0, 1, scenario_path().serialize());

        let mut dispatcher = Dispatcher::new(&WITHOUT, FixedKeyStore::new(), AutoApprove);
        dispatcher.process(&sr25519_init);
        let response = dispatcher.process(&apdu(CLA, INS_SIGN_RAW, 2, 1, msg.clone()));
        assert_eq!(response.status, StatusWord::UnsupportedKeyKind);
        assert_eq!(dispatcher.keystore.calls.get(), 0);

        let mut dispatcher = Dispatcher::new(&WITH, FixedKeyStore::new(), AutoApprove);
        dispatcher.process(&sr25519_init);
        let response = dispatcher.process(&apdu(CLA, INS_SIGN_RAW, 2, 1, msg));
        assert_eq!(response.status, StatusWord::NoError);
        assert_eq!(response.data.len(), 65);
        assert_eq!(response.data[0], 1);
    }

    #[test]
    fn version() {
        let mut dispatcher = counting();
        let response = dispatcher.process(&apdu(CLA, INS_GET_VERSION, 0, 0, vec![]));
        assert_eq!(response.status, StatusWord::NoError);
        assert_eq!(response.data, vec![0, 3, 28, 0]);
    }

    #[test]
    fn address() {
        let mut dispatcher = software();
        let response =
            dispatcher.process(&apdu(CLA, INS_GET_ADDR, 0, 0, scenario_path().serialize()));
        assert_eq!(response.status, StatusWord::NoError);

        let mut pk = [0u8; 32];
        pk.copy_from_slice(&response.data[..32]);
        let address = std::str::from_utf8(&response.data[32..]).unwrap();
        assert_eq!(address, ss58_encode(42, &pk).unwrap());
        assert!(address.starts_with('5'));
        assert_eq!(dispatcher.state(), State::Idle);
    }

    #[test]
    fn address_confirmation() {
        let approvals = Rc::new(Cell::new(0));
        let approver = CountingApprover {
            calls: approvals.clone(),
            reject: true,
        };
        let mut dispatcher = Dispatcher::new(&STANDARD, FixedKeyStore::new(), approver);

        let path = scenario_path().serialize();
        let response = dispatcher.process(&apdu(CLA, INS_GET_ADDR, 0, 0, path.clone()));
        assert_eq!(response.status, StatusWord::NoError);
        assert_eq!(approvals.get(), 0);

        let response = dispatcher.process(&apdu(CLA, INS_GET_ADDR, 1, 0, path.clone()));
        assert_eq!(response.status, StatusWord::Rejected);
        assert_eq!(approvals.get(), 1);

        let response = dispatcher.process(&apdu(CLA, INS_GET_ADDR, 2, 0, path));
        assert_eq!(response.status, StatusWord::InvalidP1P2);
    }

    #[test]
    fn recovery_app() {
        static RECOVERY: AppConfig = AppConfig::recovery();
        let mut dispatcher = Dispatcher::new(&RECOVERY, FixedKeyStore::new(), AutoApprove);
        let path = DerivationPath::new(vec![0x8000_002c, HDPATH_1_RECOVERY, HARDENED, 0, 0]);

        let response = dispatcher.process(&init(&path));
        assert_eq!(response.status, StatusWord::ClaNotSupported);

        let response = dispatcher.process(&apdu(CLA_RECOVERY, INS_SIGN_RAW, 0, 0, path.serialize()));
        assert_eq!(response.status, StatusWord::NoError);
        let response = dispatcher.process(&apdu(
            CLA_RECOVERY,
            INS_SIGN_RAW,
            PayloadType::Last as u8,
            0,
            message(RECOVERY.tx_version_current, 22, b"tx"),
        ));
        assert_eq!(response.status, StatusWord::NoError);
        assert_eq!(response.data.len(), 65);
    }

    struct QueueTransport {
        incoming: VecDeque<APDUCommand<Vec<u8>>>,
        sent: Vec<Vec<u8>>,
    }

    impl Transport for QueueTransport {
        type Error = std::convert::Infallible;

        fn receive(&mut self) -> Result<Option<APDUCommand<Vec<u8>>>, Self::Error> {
            Ok(self.incoming.pop_front())
        }

        fn send(&mut self, answer: &[u8]) -> Result<(), Self::Error> {
            self.sent.push(answer.to_vec());
            Ok(())
        }
    }

    #[test]
    fn serve_answers_every_command() {
        let mut transport = QueueTransport {
            incoming: VecDeque::from(vec![
                apdu(CLA, INS_GET_VERSION, 0, 0, vec![]),
                init(&scenario_path()),
                chunk(
                    PayloadType::Last,
                    message(STANDARD.tx_version_current, 22, b"tx"),
                ),
                init(&scenario_path()),
            ]),
            sent: Vec::new(),
        };
        let mut dispatcher = counting();
        dispatcher.serve(&mut transport).unwrap();

        assert_eq!(transport.sent.len(), 4);
        assert_eq!(transport.sent[0], vec![0, 3, 28, 0, 0x90, 0x00]);
        assert_eq!(transport.sent[1], vec![0x90, 0x00]);
        assert_eq!(transport.sent[2].len(), 65 + 2);
        assert_eq!(&transport.sent[2][65..], &[0x90, 0x00]);
        assert_eq!(transport.sent[3], vec![0x90, 0x00]);
        // closing the link drops the half received request
        assert_eq!(dispatcher.state(), State::Idle);
        assert_eq!(dispatcher.buffered(), 0);
    }

    #[test]
    fn error_answer_bytes() {
        let response = Response {
            data: vec![],
            status: StatusWord::InvalidCoinType,
        };
        assert_eq!(response.into_bytes(), vec![0x6a, 0x82]);
    }
}
