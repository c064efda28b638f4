//! Application State Machine
//!
//! The finite-state controller every application variant shares: it
//! drives advertising, accepts or rejects connections, reacts to
//! disconnect reasons, and orchestrates the bond store, the parameter
//! negotiator and the mesh shim. All state lives in one [`App`] value
//! that the dispatch shim owns and hands into handlers by reference;
//! there is no global state and no handler runs concurrently with
//! another.
//!
//! Every `(state, event)` pair outside the transition table is fatal
//! with [`FaultCode::InvalidState`], except the signals the radio stack
//! legitimately double-delivers across a disconnect boundary (pairing
//! completion, advert-cancel confirms, stale timer fires) — those are
//! dropped without touching any state.

use heapless::Vec;
use log::{debug, info, warn};

use crate::ble::bonding::{BondRecord, BondStore};
use crate::ble::events::{
    AccessInd, PairingStatus, SmKeys, StackEvent, ACCESS_PERMISSION, ACCESS_READ, ACCESS_WRITE,
    ACCESS_WRITE_COMPLETE,
};
use crate::ble::gap::{AdvertKind, ConnParams, DisconnectReason, TypedBdAddr};
use crate::ble::params::{ParamNegotiator, TimerOutcome};
use crate::ble::stack::{AccessStatus, RadioStack};
use crate::config::{preferred_conn_params, AdvertFallback, AppProfile};
use crate::core::fault::FaultCode;
use crate::core::nvm::{boot_region, NvmStore};
use crate::core::timer::{TimerService, TimerSlot, TimerToken};
use crate::mesh::{Association, AssociationState, MeshEvent, MeshTransport};
use crate::store::AppStore;

/// Sentinel connection handle: not connected.
pub const INVALID_CID: u16 = 0xFFFF;

/// Lifecycle states. `Init` is entered once at boot and left permanently
/// after database registration; the rest cycle for the device lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AppState {
    Init,
    FastAdvertising,
    SlowAdvertising,
    Connected,
    Disconnecting,
    Idle,
}

/// Per-connection session data. Valid only while a link is up; cleared
/// wholesale on disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectionContext {
    pub cid: u16,
    pub peer: TypedBdAddr,
    pub params: ConnParams,
}

impl ConnectionContext {
    pub const fn new() -> Self {
        Self {
            cid: INVALID_CID,
            peer: TypedBdAddr {
                addr_type: crate::ble::gap::AddrType::Public,
                addr: crate::ble::gap::BdAddr([0; 6]),
            },
            params: ConnParams {
                interval: 0,
                latency: 0,
                timeout: 0,
            },
        }
    }
}

impl Default for ConnectionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// The platform collaborators handlers may touch. Borrowed per event so
/// the `App` itself owns no I/O.
pub struct Services<'a> {
    pub stack: &'a mut dyn RadioStack,
    pub timers: &'a mut dyn TimerService,
    pub nvm: &'a mut dyn NvmStore,
    pub mesh: &'a mut dyn MeshTransport,
}

/// The shared application core.
#[derive(Debug)]
pub struct App {
    profile: AppProfile,
    state: AppState,
    conn: ConnectionContext,
    bond: BondStore,
    negotiator: ParamNegotiator,
    assoc: Association,
    store: AppStore,
    /// Bounds an advertising round for profiles with advert timeouts.
    advert_timer: TimerSlot,
}

impl App {
    /// Boot sequence: validate and read the persistent store, seed the
    /// security manager with the stored diversifier, kick off database
    /// registration and (for unassociated mesh nodes) the device-id
    /// beacon. The machine sits in `Init` until `AddDbCfm` arrives.
    pub fn boot(profile: AppProfile, svc: &mut Services<'_>) -> Result<Self, FaultCode> {
        let fresh = boot_region(svc.nvm)?;
        let bond = BondStore::load(svc.nvm, fresh)?;
        let assoc = Association::load(svc.nvm, fresh)?;
        let store = {
            let Services { stack, nvm, .. } = svc;
            let mut rng = || stack.random_word();
            AppStore::load(&mut **nvm, fresh, profile.config_flags, &mut rng)?
        };

        svc.stack.sm_init(bond.record().diversifier);

        let mut app = Self {
            profile,
            state: AppState::Init,
            conn: ConnectionContext::new(),
            bond,
            negotiator: ParamNegotiator::new(),
            assoc,
            store,
            advert_timer: TimerSlot::new(),
        };

        if profile.mesh_capable && !app.assoc.is_associated() {
            app.assoc.begin_device_id_adverts(svc.timers);
        }

        info!("APP: boot complete, registering database");
        svc.stack.add_database();
        Ok(app)
    }

    pub fn state(&self) -> AppState {
        self.state
    }

    pub fn connection(&self) -> &ConnectionContext {
        &self.conn
    }

    pub fn bond(&self) -> &BondRecord {
        self.bond.record()
    }

    pub fn association_state(&self) -> AssociationState {
        self.assoc.state()
    }

    pub fn store(&self) -> &AppStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut AppStore {
        &mut self.store
    }

    /// Route one inbound event. An `Err` is a fatal condition the
    /// dispatcher reports through the fault funnel.
    pub fn handle(&mut self, svc: &mut Services<'_>, event: StackEvent) -> Result<(), FaultCode> {
        match event {
            StackEvent::AddDbCfm { success } => self.on_add_db_cfm(svc, success),
            StackEvent::ConnectCfm { success, cid, peer } => {
                self.on_connect_cfm(svc, success, cid, peer)
            }
            StackEvent::ConnectionComplete { params } => {
                // Arrives just ahead of the connect confirm; remember the
                // initial link parameters for the compliance check.
                self.conn.params = params;
                Ok(())
            }
            StackEvent::ConnectionUpdate { params } => self.on_connection_update(svc, params),
            StackEvent::CancelConnectCfm => self.on_cancel_connect_cfm(svc),
            StackEvent::DisconnectComplete { reason } => self.on_disconnect_complete(svc, reason),
            StackEvent::PairingAuthInd { auth_handle } => self.on_pairing_auth_ind(svc, auth_handle),
            StackEvent::PairingCompleteInd { status, peer } => {
                self.on_pairing_complete(svc, status, peer)
            }
            StackEvent::KeysInd { keys } => self.on_keys_ind(svc, keys),
            StackEvent::DivApproveInd { cid, diversifier } => {
                self.on_div_approve_ind(svc, cid, diversifier)
            }
            StackEvent::AccessInd(ind) => self.on_access_ind(svc, ind),
            StackEvent::ParamUpdateCfm { success } => self.on_param_update_cfm(svc, success),
            StackEvent::ParamUpdateInd => self.on_param_update_ind(svc),
            StackEvent::Timer { token } => self.on_timer(svc, token),
        }
    }

    /// Route one event from the mesh layer.
    pub fn on_mesh_event(&mut self, svc: &mut Services<'_>, event: MeshEvent) -> Result<(), FaultCode> {
        match event {
            MeshEvent::GroupSet {
                model,
                index,
                group_id,
            } => {
                self.store.set_group(svc.nvm, model, index, group_id)?;
                Ok(())
            }
            other => {
                self.assoc.on_association_event(svc.nvm, svc.timers, other)?;
                Ok(())
            }
        }
    }

    /// User-requested association removal (removal key held down).
    pub fn clear_association(&mut self, svc: &mut Services<'_>) -> Result<(), FaultCode> {
        if self.profile.mesh_capable && self.assoc.state() != AssociationState::NotAssociated {
            self.assoc.clear(svc.nvm, svc.timers)?;
        }
        Ok(())
    }

    /// User-requested bond removal.
    pub fn clear_bond(&mut self, svc: &mut Services<'_>) -> Result<(), FaultCode> {
        self.bond.clear(svc.nvm)?;
        Ok(())
    }

    fn on_add_db_cfm(&mut self, svc: &mut Services<'_>, success: bool) -> Result<(), FaultCode> {
        match self.state {
            AppState::Init => {
                if success {
                    self.set_state(svc, AppState::FastAdvertising)
                } else {
                    Err(FaultCode::DbRegistration)
                }
            }
            _ => Err(FaultCode::InvalidState),
        }
    }

    fn on_connect_cfm(
        &mut self,
        svc: &mut Services<'_>,
        success: bool,
        cid: u16,
        peer: TypedBdAddr,
    ) -> Result<(), FaultCode> {
        match self.state {
            AppState::FastAdvertising | AppState::SlowAdvertising => {
                if !success {
                    debug!("APP: connect failed, back to fast adverts");
                    if self.state == AppState::FastAdvertising {
                        // Restart the round the failed attempt consumed.
                        svc.stack.start_adverts(AdvertKind::Fast, self.use_whitelist());
                        return Ok(());
                    }
                    return self.set_state(svc, AppState::FastAdvertising);
                }

                self.conn.cid = cid;
                self.conn.peer = peer;

                let bond = *self.bond.record();
                if bond.bonded
                    && bond.addr.is_resolvable_private()
                    && !svc.stack.privacy_match_address(&peer, &bond.irk)
                {
                    // Bonded to a resolvable-address peer and this
                    // address does not resolve against the stored IRK: a
                    // stale or forged address. Tear the link down.
                    warn!("APP: peer failed identity resolution, disconnecting");
                    return self.set_state(svc, AppState::Disconnecting);
                }

                self.set_state(svc, AppState::Connected)?;

                // Open the mesh bearer slot and get mesh processing
                // going on this link.
                if self.profile.mesh_capable {
                    svc.mesh.data_in_connection(cid, self.conn.params.interval);
                    svc.mesh.start();
                }

                self.negotiator.reset();
                if !preferred_conn_params().complies(&self.conn.params) {
                    self.negotiator.arm_discovery(svc.timers);
                }
                Ok(())
            }
            _ => Err(FaultCode::InvalidState),
        }
    }

    fn on_connection_update(
        &mut self,
        svc: &mut Services<'_>,
        params: ConnParams,
    ) -> Result<(), FaultCode> {
        match self.state {
            AppState::Connected | AppState::Disconnecting => {
                self.conn.params = params;
                if self.profile.mesh_capable {
                    svc.mesh.data_in_connection(self.conn.cid, params.interval);
                }
                debug!("APP: parameters now interval={}", params.interval);
                Ok(())
            }
            _ => Err(FaultCode::InvalidState),
        }
    }

    fn on_cancel_connect_cfm(&mut self, svc: &mut Services<'_>) -> Result<(), FaultCode> {
        match self.state {
            AppState::FastAdvertising => match self.profile.fast_advert_cancelled {
                AdvertFallback::Stay => Ok(()),
                AdvertFallback::Slow => self.set_state(svc, AppState::SlowAdvertising),
                AdvertFallback::Idle => self.set_state(svc, AppState::Idle),
            },
            AppState::SlowAdvertising => match self.profile.slow_advert_cancelled {
                AdvertFallback::Stay => Ok(()),
                AdvertFallback::Slow => Ok(()),
                AdvertFallback::Idle => self.set_state(svc, AppState::Idle),
            },
            // The mesh layer cancels its own advert rounds, and our
            // Connected-entry stop produces one too.
            AppState::Connected | AppState::Idle => Ok(()),
            _ => Err(FaultCode::InvalidState),
        }
    }

    fn on_disconnect_complete(
        &mut self,
        svc: &mut Services<'_>,
        reason: DisconnectReason,
    ) -> Result<(), FaultCode> {
        match self.state {
            AppState::Connected | AppState::Disconnecting => {
                // A remote drop skips Disconnecting, so its exit action
                // will not run; reinitialise the session here.
                if self.state == AppState::Connected {
                    self.session_reset(svc);
                }

                let next = match reason {
                    DisconnectReason::SupervisionTimeout | DisconnectReason::LocalHost => {
                        AppState::FastAdvertising
                    }
                    // A deliberate remote disconnect from a bonded host
                    // is a settled session: advertise at the reduced
                    // rate until the host wants us again.
                    DisconnectReason::RemoteHost => {
                        if self.bond.is_bonded() {
                            AppState::SlowAdvertising
                        } else {
                            AppState::FastAdvertising
                        }
                    }
                };
                info!("APP: disconnected ({:?})", reason);
                self.set_state(svc, next)
            }
            _ => Err(FaultCode::InvalidState),
        }
    }

    fn on_pairing_auth_ind(
        &mut self,
        svc: &mut Services<'_>,
        auth_handle: u16,
    ) -> Result<(), FaultCode> {
        match self.state {
            AppState::Connected => {
                // Always authorise: there is no way for a peer to delete
                // an existing bond, so a host that lost its copy must be
                // allowed to pair afresh.
                info!("SEC: authorising pairing request");
                svc.stack.pairing_auth_response(auth_handle, true);
                Ok(())
            }
            _ => Err(FaultCode::InvalidState),
        }
    }

    fn on_pairing_complete(
        &mut self,
        svc: &mut Services<'_>,
        status: PairingStatus,
        peer: TypedBdAddr,
    ) -> Result<(), FaultCode> {
        match self.state {
            AppState::Connected => match status {
                PairingStatus::Success => {
                    self.bond.store_pairing(svc.nvm, peer)?;
                    if !peer.is_resolvable_private() {
                        // Resolvable peers are matched by IRK instead;
                        // their rotating addresses must never be
                        // whitelisted.
                        if svc.stack.add_whitelist_device(&peer).is_err() {
                            return Err(FaultCode::AddWhitelist);
                        }
                    }
                    Ok(())
                }
                PairingStatus::RepeatedAttempts => {
                    warn!("SEC: repeated pairing failures, disconnecting");
                    self.set_state(svc, AppState::Disconnecting)
                }
                PairingStatus::Failed(code) => {
                    // A bonded host may have wanted new keys. Leave the
                    // link up so it can still encrypt with the old ones.
                    debug!("SEC: pairing failed ({:#06x})", code);
                    Ok(())
                }
            },
            // The security manager may deliver this after the link
            // already dropped.
            _ => {
                debug!("SEC: pairing completion after disconnect, ignored");
                Ok(())
            }
        }
    }

    fn on_keys_ind(&mut self, svc: &mut Services<'_>, keys: SmKeys) -> Result<(), FaultCode> {
        match self.state {
            AppState::Connected => {
                if let Some(diversifier) = keys.diversifier {
                    // Gates future re-encryption requests.
                    self.bond.store_diversifier(svc.nvm, diversifier)?;
                }
                if let Some(irk) = keys.irk {
                    if self.conn.peer.is_resolvable_private() {
                        // Only resolvable peers need their identity key
                        // kept; anyone else is recognised by address.
                        self.bond.store_irk(svc.nvm, irk)?;
                    }
                }
                Ok(())
            }
            _ => Err(FaultCode::InvalidState),
        }
    }

    fn on_div_approve_ind(
        &mut self,
        svc: &mut Services<'_>,
        cid: u16,
        diversifier: u16,
    ) -> Result<(), FaultCode> {
        match self.state {
            AppState::Connected => {
                let verdict = self.bond.approve_diversifier(diversifier);
                info!("SEC: diversifier {:#06x} {:?}", diversifier, verdict);
                svc.stack.div_approval(cid, verdict);
                Ok(())
            }
            _ => Err(FaultCode::InvalidState),
        }
    }

    fn on_access_ind(&mut self, svc: &mut Services<'_>, ind: AccessInd) -> Result<(), FaultCode> {
        match self.state {
            AppState::Connected => {
                // Attribute traffic means the central is still busy with
                // discovery or configuration.
                self.negotiator.on_access_ind(svc.timers);

                if ind.flags & ACCESS_WRITE != 0 {
                    if ind.flags & (ACCESS_PERMISSION | ACCESS_WRITE_COMPLETE) == ACCESS_PERMISSION
                    {
                        // Permission check for a prepared write: allow.
                        svc.stack
                            .access_response(ind.cid, ind.handle, AccessStatus::Success, &[]);
                    } else {
                        let status = svc.mesh.access_write(ind.handle, &ind.value);
                        svc.stack.access_response(ind.cid, ind.handle, status, &[]);
                    }
                } else if ind.flags & ACCESS_WRITE_COMPLETE != 0 {
                    svc.stack
                        .access_response(ind.cid, ind.handle, AccessStatus::Success, &[]);
                } else if ind.flags == ACCESS_READ | ACCESS_PERMISSION {
                    let mut value = Vec::new();
                    let status = svc.mesh.access_read(ind.handle, &mut value);
                    svc.stack.access_response(ind.cid, ind.handle, status, &value);
                } else {
                    svc.stack.access_response(
                        ind.cid,
                        ind.handle,
                        AccessStatus::RequestNotSupported,
                        &[],
                    );
                }
                Ok(())
            }
            _ => Err(FaultCode::InvalidState),
        }
    }

    fn on_param_update_cfm(&mut self, svc: &mut Services<'_>, success: bool) -> Result<(), FaultCode> {
        match self.state {
            AppState::Connected => {
                self.negotiator.on_update_cfm(svc.timers, success);
                Ok(())
            }
            _ => Err(FaultCode::InvalidState),
        }
    }

    fn on_param_update_ind(&mut self, svc: &mut Services<'_>) -> Result<(), FaultCode> {
        match self.state {
            AppState::Connected => {
                let complies = preferred_conn_params().complies(&self.conn.params);
                self.negotiator.on_external_update(svc.timers, complies);
                Ok(())
            }
            _ => Err(FaultCode::InvalidState),
        }
    }

    fn on_timer(&mut self, svc: &mut Services<'_>, token: TimerToken) -> Result<(), FaultCode> {
        match self.negotiator.on_timer(svc.timers, token) {
            TimerOutcome::NotMine => {}
            TimerOutcome::Waiting | TimerOutcome::Abandoned => return Ok(()),
            TimerOutcome::Request(req) => {
                // A fire racing a disconnect carries no link to act on.
                if self.state == AppState::Connected {
                    if svc
                        .stack
                        .conn_param_update_request(&self.conn.peer, &req)
                        .is_err()
                    {
                        return Err(FaultCode::ConnParamUpdate);
                    }
                }
                return Ok(());
            }
        }

        if self.advert_timer.try_claim(token) {
            // Advertising round expired; the cancel confirm moves the
            // state on.
            if matches!(
                self.state,
                AppState::FastAdvertising | AppState::SlowAdvertising
            ) {
                svc.stack.stop_adverts();
            }
            return Ok(());
        }

        if self.profile.mesh_capable {
            let suppress = self.state == AppState::FastAdvertising;
            if self.assoc.on_timer(svc.timers, svc.mesh, token, suppress) {
                return Ok(());
            }
        }

        if self.store.on_timer(svc.nvm, token)? {
            return Ok(());
        }

        // Superseded timer; its slot has moved on.
        debug!("APP: stale timer {} ignored", token.raw());
        Ok(())
    }

    /// Run the exit/entry actions for a state change. Setting the
    /// current state again is a no-op.
    fn set_state(&mut self, svc: &mut Services<'_>, new: AppState) -> Result<(), FaultCode> {
        if self.state == new {
            return Ok(());
        }
        let old = self.state;

        match old {
            AppState::Init => {
                let record = *self.bond.record();
                if record.bonded && !record.addr.is_resolvable_private() {
                    // Known peer with a stable address: let the link
                    // layer filter for it. Failure here is a broken
                    // configuration, not a runtime condition.
                    if svc.stack.add_whitelist_device(&record.addr).is_err() {
                        return Err(FaultCode::AddWhitelist);
                    }
                }
            }
            AppState::FastAdvertising | AppState::SlowAdvertising => {
                svc.stack.stop_adverts();
                self.advert_timer.disarm();
            }
            AppState::Disconnecting => self.session_reset(svc),
            AppState::Connected | AppState::Idle => {}
        }

        info!("APP: {:?} -> {:?}", old, new);
        self.state = new;

        match new {
            AppState::FastAdvertising => {
                svc.stack.start_adverts(AdvertKind::Fast, self.use_whitelist());
                if let Some(timeout) = self.profile.fast_advert_timeout {
                    self.advert_timer.arm(svc.timers, timeout);
                }
            }
            AppState::SlowAdvertising => {
                svc.stack.start_adverts(AdvertKind::Slow, self.use_whitelist());
                if let Some(timeout) = self.profile.slow_advert_timeout {
                    self.advert_timer.arm(svc.timers, timeout);
                }
            }
            AppState::Connected => {
                svc.stack.stop_adverts();
            }
            AppState::Disconnecting => {
                svc.stack.disconnect(self.conn.cid);
            }
            AppState::Idle => {
                // Mesh nodes keep listening on the advertising bearer
                // even with the GATT side quiet.
                if self.profile.mesh_capable {
                    svc.mesh.start();
                }
            }
            AppState::Init => {}
        }
        Ok(())
    }

    /// Full per-session reinitialisation: connection context, pending
    /// negotiation and the bearer slot all go back to their idle shape.
    fn session_reset(&mut self, svc: &mut Services<'_>) {
        self.negotiator.reset();
        self.advert_timer.disarm();
        self.conn = ConnectionContext::new();
        if self.profile.mesh_capable {
            svc.mesh.data_in_connection(INVALID_CID, 0);
        }
    }

    /// Adverts are whitelist-filtered once bonded to a peer with a
    /// stable address. Resolvable peers cannot be filtered this way.
    fn use_whitelist(&self) -> bool {
        let record = self.bond.record();
        record.bonded && !record.addr.is_resolvable_private()
    }
}
