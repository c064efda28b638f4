//! Mesh Transport Shim
//!
//! The CSRmesh transport and model layer is a black box reached through
//! [`MeshTransport`]; this module owns only what the connection state
//! machine needs from it: the persisted association state, the
//! device-identification beacon timer that runs until the device joins a
//! network, and routing of the few mesh events that mutate persistent
//! state.

use heapless::Vec;
use log::{debug, info};

use crate::ble::events::MAX_ACCESS_VALUE_LEN;
use crate::ble::stack::AccessStatus;
use crate::config::DEVICE_ID_ADVERT_PERIOD;
use crate::core::layout::Field;
use crate::core::nvm::{read_word, write_word, NvmError, NvmStore};
use crate::core::timer::{TimerService, TimerSlot, TimerToken};

/// Association lifecycle of a mesh node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AssociationState {
    #[default]
    NotAssociated,
    /// An association request was seen; keys have not arrived yet.
    AssociationStarted,
    Associated,
}

impl AssociationState {
    fn to_word(self) -> u16 {
        match self {
            AssociationState::NotAssociated => 0,
            AssociationState::AssociationStarted => 1,
            AssociationState::Associated => 2,
        }
    }

    fn from_word(word: u16) -> Self {
        match word {
            2 => AssociationState::Associated,
            // `AssociationStarted` is transient and not persisted; a
            // power cycle mid-association starts over.
            _ => AssociationState::NotAssociated,
        }
    }
}

/// Model addressed by a group assignment message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MeshModel {
    Light,
    Power,
    Attention,
}

/// Mesh-layer events the connection core cares about. Model traffic
/// (levels, colours, pings) stays inside the black box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MeshEvent {
    /// A configuration device answered our device-identification beacon.
    AssociationRequest,
    /// Network keys were distributed; the device is now on the mesh.
    KeyDistribution,
    /// The configuration device removed us from the network.
    ResetDevice,
    /// Group assignment for one model slot.
    GroupSet {
        model: MeshModel,
        index: u8,
        group_id: u16,
    },
}

/// Entry points of the mesh transport black box.
pub trait MeshTransport {
    /// Tell the transport a GATT bearer slot opened or closed.
    /// `cid` is the sentinel invalid handle on disconnect, with a zero
    /// interval.
    fn data_in_connection(&mut self, cid: u16, interval: u16);

    /// Start (or resume) mesh processing.
    fn start(&mut self);

    /// Broadcast one device-identification beacon.
    fn advertise_device_id(&mut self);

    /// Route a write against a mesh-control attribute handle.
    fn access_write(&mut self, handle: u16, value: &[u8]) -> AccessStatus;

    /// Route a read against a mesh-control attribute handle, filling
    /// `out` with the attribute value on success.
    fn access_read(
        &mut self,
        handle: u16,
        out: &mut Vec<u8, MAX_ACCESS_VALUE_LEN>,
    ) -> AccessStatus;
}

/// Association state plus the beacon timer that advertises for one.
#[derive(Debug)]
pub struct Association {
    state: AssociationState,
    advert_timer: TimerSlot,
}

impl Association {
    /// Seed from NVM; fresh regions start life unassociated.
    pub fn load(nvm: &mut dyn NvmStore, fresh: bool) -> Result<Self, NvmError> {
        let state = if fresh {
            write_word(nvm, Field::AssociationState, AssociationState::NotAssociated.to_word())?;
            AssociationState::NotAssociated
        } else {
            AssociationState::from_word(read_word(nvm, Field::AssociationState)?)
        };
        info!("MESH: association state {:?}", state);
        Ok(Self {
            state,
            advert_timer: TimerSlot::new(),
        })
    }

    pub fn state(&self) -> AssociationState {
        self.state
    }

    pub fn is_associated(&self) -> bool {
        self.state == AssociationState::Associated
    }

    /// Begin the periodic device-identification beacon. Runs until the
    /// device becomes associated.
    pub fn begin_device_id_adverts(&mut self, timers: &mut dyn TimerService) {
        self.advert_timer.arm(timers, DEVICE_ID_ADVERT_PERIOD);
        debug!("MESH: device-id beacon timer started");
    }

    /// Beacon timer routing. `suppress` skips the actual beacon when the
    /// node is already busy fast-advertising for a connection; the timer
    /// keeps running either way. Returns whether the token was ours.
    pub fn on_timer(
        &mut self,
        timers: &mut dyn TimerService,
        mesh: &mut dyn MeshTransport,
        token: TimerToken,
        suppress: bool,
    ) -> bool {
        if !self.advert_timer.try_claim(token) {
            return false;
        }
        if self.state == AssociationState::NotAssociated {
            if !suppress {
                mesh.advertise_device_id();
            }
            self.advert_timer.arm(timers, DEVICE_ID_ADVERT_PERIOD);
        }
        // Associated: let the timer chain end.
        true
    }

    /// Association progress from the mesh layer. Only the durable states
    /// are persisted; `AssociationStarted` is transient.
    pub fn on_association_event(
        &mut self,
        nvm: &mut dyn NvmStore,
        timers: &mut dyn TimerService,
        event: MeshEvent,
    ) -> Result<(), NvmError> {
        match event {
            MeshEvent::AssociationRequest => {
                if self.state != AssociationState::AssociationStarted {
                    info!("MESH: association started");
                    self.state = AssociationState::AssociationStarted;
                }
            }
            MeshEvent::KeyDistribution => {
                info!("MESH: associated");
                self.state = AssociationState::Associated;
                write_word(nvm, Field::AssociationState, self.state.to_word())?;
                self.advert_timer.disarm();
            }
            MeshEvent::ResetDevice => {
                info!("MESH: removed from network");
                self.clear(nvm, timers)?;
            }
            MeshEvent::GroupSet { .. } => {}
        }
        Ok(())
    }

    /// Drop the association (mesh reset or the removal key press) and
    /// resume advertising for a new network.
    pub fn clear(
        &mut self,
        nvm: &mut dyn NvmStore,
        timers: &mut dyn TimerService,
    ) -> Result<(), NvmError> {
        self.state = AssociationState::NotAssociated;
        write_word(nvm, Field::AssociationState, self.state.to_word())?;
        self.begin_device_id_adverts(timers);
        Ok(())
    }
}
