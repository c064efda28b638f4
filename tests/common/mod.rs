//! Shared test harness: recording mocks for the radio stack, timer
//! service, NVM block and mesh transport, plus a bench that wires them
//! to a booted dispatcher and offers canned event flows.

#![allow(dead_code)]

use core::num::NonZeroU32;

use embassy_time::Duration;

use csr1010_mesh_firmware::ble::app::{App, Services};
use csr1010_mesh_firmware::ble::dispatch::Dispatcher;
use csr1010_mesh_firmware::ble::events::{StackEvent, MAX_ACCESS_VALUE_LEN};
use csr1010_mesh_firmware::ble::gap::{
    AddrType, AdvertKind, ConnParamReq, ConnParams, Irk, TypedBdAddr,
};
use csr1010_mesh_firmware::ble::stack::{AccessStatus, DivVerdict, RadioStack, StackError};
use csr1010_mesh_firmware::config::AppProfile;
use csr1010_mesh_firmware::core::fault::FaultCode;
use csr1010_mesh_firmware::core::layout::NVM_APP_WORDS;
use csr1010_mesh_firmware::core::nvm::{NvmError, NvmStore, Word};
use csr1010_mesh_firmware::core::timer::{TimerService, TimerToken};
use csr1010_mesh_firmware::mesh::{MeshEvent, MeshTransport};

/// Connection handle the bench uses for established links.
pub const TEST_CID: u16 = 0x0040;

/// Link parameters a typical central sets up: 30 ms interval, clearly
/// outside the 1 s preferred window.
pub const DEFAULT_PARAMS: ConnParams = ConnParams {
    interval: 24,
    latency: 0,
    timeout: 400,
};

/// Parameters inside the preferred window.
pub const COMPLIANT_PARAMS: ConnParams = ConnParams {
    interval: 0x0320,
    latency: 0,
    timeout: 0x0258,
};

pub fn public_addr(tag: u8) -> TypedBdAddr {
    TypedBdAddr::new(AddrType::Public, [tag, 0x22, 0x33, 0x44, 0x55, 0x00])
}

/// Resolvable private address (top bits 0b01).
pub fn resolvable_addr(tag: u8) -> TypedBdAddr {
    TypedBdAddr::new(AddrType::Random, [tag, 0x22, 0x33, 0x44, 0x55, 0x4A])
}

/// Static random address (top bits 0b11): random-type but not
/// resolvable.
pub fn static_random_addr(tag: u8) -> TypedBdAddr {
    TypedBdAddr::new(AddrType::Random, [tag, 0x22, 0x33, 0x44, 0x55, 0xC5])
}

pub fn test_irk(seed: u16) -> Irk {
    let mut words = [0u16; 8];
    for (i, word) in words.iter_mut().enumerate() {
        *word = seed.wrapping_add(i as u16);
    }
    Irk(words)
}

/// RAM-backed NVM region, erased to the unprogrammed pattern.
pub struct RamNvm {
    pub words: [Word; NVM_APP_WORDS],
    pub writes: usize,
}

impl RamNvm {
    pub fn blank() -> Self {
        Self {
            words: [0xFFFF; NVM_APP_WORDS],
            writes: 0,
        }
    }
}

impl NvmStore for RamNvm {
    fn read(&self, offset: usize, buf: &mut [Word]) -> Result<(), NvmError> {
        let end = offset + buf.len();
        buf.copy_from_slice(self.words.get(offset..end).ok_or(NvmError::OutOfRange)?);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[Word]) -> Result<(), NvmError> {
        let end = offset + data.len();
        self.words
            .get_mut(offset..end)
            .ok_or(NvmError::OutOfRange)?
            .copy_from_slice(data);
        self.writes += 1;
        Ok(())
    }

    fn erase(&mut self) -> Result<(), NvmError> {
        self.words.fill(0xFFFF);
        Ok(())
    }
}

/// Counter-based timer service; tokens are handed out sequentially and
/// every start is recorded.
#[derive(Default)]
pub struct MockTimers {
    next: u32,
    pub started: Vec<(u32, Duration)>,
}

impl MockTimers {
    /// Token of the most recently started timer.
    pub fn last_token(&self) -> TimerToken {
        token(self.next)
    }

    pub fn last_period(&self) -> Duration {
        self.started.last().expect("no timer started").1
    }
}

impl TimerService for MockTimers {
    fn start(&mut self, period: Duration) -> TimerToken {
        self.next += 1;
        self.started.push((self.next, period));
        token(self.next)
    }
}

pub fn token(raw: u32) -> TimerToken {
    TimerToken::from_raw(NonZeroU32::new(raw).expect("token zero"))
}

/// Recording radio stack with scriptable failure points.
#[derive(Default)]
pub struct MockStack {
    pub db_registrations: usize,
    pub sm_init_div: Option<u16>,
    pub advert_starts: Vec<(AdvertKind, bool)>,
    pub advert_stops: usize,
    pub disconnects: Vec<u16>,
    pub param_requests: Vec<ConnParamReq>,
    pub param_request_fail: bool,
    pub whitelist: Vec<TypedBdAddr>,
    pub whitelist_fail: bool,
    pub auth_responses: Vec<(u16, bool)>,
    pub div_verdicts: Vec<(u16, DivVerdict)>,
    pub access_responses: Vec<(u16, u16, AccessStatus)>,
    /// Result the privacy matcher reports for every query.
    pub privacy_match: bool,
    pub privacy_queries: usize,
    pub faults: Vec<FaultCode>,
    rng_state: u16,
}

impl RadioStack for MockStack {
    fn add_database(&mut self) {
        self.db_registrations += 1;
    }

    fn sm_init(&mut self, diversifier: u16) {
        self.sm_init_div = Some(diversifier);
    }

    fn start_adverts(&mut self, kind: AdvertKind, use_whitelist: bool) {
        self.advert_starts.push((kind, use_whitelist));
    }

    fn stop_adverts(&mut self) {
        self.advert_stops += 1;
    }

    fn disconnect(&mut self, cid: u16) {
        self.disconnects.push(cid);
    }

    fn conn_param_update_request(
        &mut self,
        _peer: &TypedBdAddr,
        req: &ConnParamReq,
    ) -> Result<(), StackError> {
        if self.param_request_fail {
            return Err(StackError::Rejected);
        }
        self.param_requests.push(*req);
        Ok(())
    }

    fn add_whitelist_device(&mut self, addr: &TypedBdAddr) -> Result<(), StackError> {
        if self.whitelist_fail {
            return Err(StackError::Rejected);
        }
        self.whitelist.push(*addr);
        Ok(())
    }

    fn pairing_auth_response(&mut self, auth_handle: u16, accept: bool) {
        self.auth_responses.push((auth_handle, accept));
    }

    fn div_approval(&mut self, cid: u16, verdict: DivVerdict) {
        self.div_verdicts.push((cid, verdict));
    }

    fn access_response(&mut self, cid: u16, handle: u16, status: AccessStatus, _value: &[u8]) {
        self.access_responses.push((cid, handle, status));
    }

    fn privacy_match_address(&mut self, _addr: &TypedBdAddr, _irk: &Irk) -> bool {
        self.privacy_queries += 1;
        self.privacy_match
    }

    fn random_word(&mut self) -> u16 {
        self.rng_state = self.rng_state.wrapping_mul(31).wrapping_add(7);
        self.rng_state
    }

    fn report_fault(&mut self, code: FaultCode) {
        self.faults.push(code);
    }
}

/// Recording mesh transport black box.
#[derive(Default)]
pub struct MockMesh {
    /// `data_in_connection` notices as (cid, interval).
    pub connection_notices: Vec<(u16, u16)>,
    pub starts: usize,
    pub device_id_adverts: usize,
    pub writes: Vec<(u16, Vec<u8>)>,
    pub reads: Vec<u16>,
}

impl MeshTransport for MockMesh {
    fn data_in_connection(&mut self, cid: u16, interval: u16) {
        self.connection_notices.push((cid, interval));
    }

    fn start(&mut self) {
        self.starts += 1;
    }

    fn advertise_device_id(&mut self) {
        self.device_id_adverts += 1;
    }

    fn access_write(&mut self, handle: u16, value: &[u8]) -> AccessStatus {
        self.writes.push((handle, value.to_vec()));
        AccessStatus::Success
    }

    fn access_read(
        &mut self,
        handle: u16,
        out: &mut heapless::Vec<u8, MAX_ACCESS_VALUE_LEN>,
    ) -> AccessStatus {
        self.reads.push(handle);
        let _ = out.extend_from_slice(&[0xA5, 0x5A]);
        AccessStatus::Success
    }
}

/// A booted dispatcher wired to the four mocks.
pub struct Bench {
    pub stack: MockStack,
    pub timers: MockTimers,
    pub nvm: RamNvm,
    pub mesh: MockMesh,
    pub disp: Dispatcher,
}

impl Bench {
    /// Boot on a blank NVM region.
    pub fn boot(profile: AppProfile) -> Self {
        Self::boot_with_nvm(profile, RamNvm::blank())
    }

    /// Boot on an existing region (simulated power cycle).
    pub fn boot_with_nvm(profile: AppProfile, mut nvm: RamNvm) -> Self {
        let mut stack = MockStack::default();
        let mut timers = MockTimers::default();
        let mut mesh = MockMesh::default();
        let disp = {
            let mut svc = Services {
                stack: &mut stack,
                timers: &mut timers,
                nvm: &mut nvm,
                mesh: &mut mesh,
            };
            Dispatcher::boot(profile, &mut svc).expect("boot failed")
        };
        Self {
            stack,
            timers,
            nvm,
            mesh,
            disp,
        }
    }

    pub fn app(&self) -> &App {
        self.disp.app()
    }

    pub fn dispatch(&mut self, event: StackEvent) {
        let mut svc = Services {
            stack: &mut self.stack,
            timers: &mut self.timers,
            nvm: &mut self.nvm,
            mesh: &mut self.mesh,
        };
        self.disp.dispatch(&mut svc, event);
    }

    pub fn dispatch_mesh(&mut self, event: MeshEvent) {
        let mut svc = Services {
            stack: &mut self.stack,
            timers: &mut self.timers,
            nvm: &mut self.nvm,
            mesh: &mut self.mesh,
        };
        self.disp.dispatch_mesh(&mut svc, event);
    }

    pub fn fire(&mut self, token: TimerToken) {
        self.dispatch(StackEvent::Timer { token });
    }

    /// User-requested bond removal (pairing button held).
    pub fn clear_bond(&mut self) {
        let mut svc = Services {
            stack: &mut self.stack,
            timers: &mut self.timers,
            nvm: &mut self.nvm,
            mesh: &mut self.mesh,
        };
        self.disp
            .app_mut()
            .clear_bond(&mut svc)
            .expect("bond removal failed");
    }

    /// User-requested association removal (removal key held).
    pub fn clear_association(&mut self) {
        let mut svc = Services {
            stack: &mut self.stack,
            timers: &mut self.timers,
            nvm: &mut self.nvm,
            mesh: &mut self.mesh,
        };
        self.disp
            .app_mut()
            .clear_association(&mut svc)
            .expect("association removal failed");
    }

    /// Leave `Init` through a successful database registration.
    pub fn to_fast_advertising(&mut self) {
        self.dispatch(StackEvent::AddDbCfm { success: true });
    }

    /// Establish a connection with the given peer and parameters.
    pub fn connect(&mut self, peer: TypedBdAddr, params: ConnParams) {
        self.dispatch(StackEvent::ConnectionComplete { params });
        self.dispatch(StackEvent::ConnectCfm {
            success: true,
            cid: TEST_CID,
            peer,
        });
    }

    /// Boot → fast adverts → connected, in one call.
    pub fn boot_and_connect(profile: AppProfile, peer: TypedBdAddr, params: ConnParams) -> Self {
        let mut bench = Self::boot(profile);
        bench.to_fast_advertising();
        bench.connect(peer, params);
        bench
    }
}
