//! Application Payload Store
//!
//! Mesh identity and model payload persisted after the bonding block:
//! device UUID, authorisation code, per-model group tables, the packed
//! lamp state and the bearer configuration. Group and bearer mutations
//! are written through like the security fields; only the high-churn
//! lamp word pair defers behind a debounce timer so colour fades do not
//! wear the NVM out.

use log::{debug, info};

use crate::config::{FLAG_BRIDGE_ENABLE, FLAG_RANDOM_UUID, FLAG_RELAY_ENABLE, NVM_WRITE_DEFER_DURATION};
use crate::core::layout::{AUTH_CODE_WORDS, DEVICE_UUID_WORDS, Field, MAX_MODEL_GROUPS};
use crate::core::nvm::{NvmError, NvmStore, Word};
use crate::core::timer::{TimerService, TimerSlot, TimerToken};
use crate::mesh::MeshModel;

/// Factory-default device UUID, big-endian pairs swapped into words.
const DEFAULT_DEVICE_UUID: [Word; DEVICE_UUID_WORDS] =
    [0x11e4, 0xb12c, 0x5042, 0x11e3, 0x9618, 0xce3f, 0x5508, 0xacd9];

/// Factory-default authorisation code.
const DEFAULT_AUTH_CODE: [Word; AUTH_CODE_WORDS] = [0x3412, 0x7856, 0x3412, 0x7856];

/// Bearer mask bit: the LE advertising bearer.
pub const BEARER_BLE_MASK: u16 = 0x0001;

/// Bearer mask bit: the GATT server (bridge) bearer.
pub const BEARER_GATT_SERVER_MASK: u16 = 0x0002;

/// Lamp power state, persisted in the packed RGB word pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerState {
    #[default]
    Off,
    On,
    Standby,
    OnFromStandby,
}

impl PowerState {
    fn to_byte(self) -> u8 {
        match self {
            PowerState::Off => 0,
            PowerState::On => 1,
            PowerState::Standby => 2,
            PowerState::OnFromStandby => 3,
        }
    }

    fn from_byte(byte: u8) -> Self {
        match byte {
            1 => PowerState::On,
            2 => PowerState::Standby,
            3 => PowerState::OnFromStandby,
            _ => PowerState::Off,
        }
    }
}

/// Colour and power payload of the light model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LampState {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub power: PowerState,
}

impl Default for LampState {
    fn default() -> Self {
        // Factory state: full white, switched off.
        Self {
            red: 0xFF,
            green: 0xFF,
            blue: 0xFF,
            power: PowerState::Off,
        }
    }
}

impl LampState {
    /// Packed layout: low word GREEN:RED, high word POWER:BLUE.
    fn to_words(self) -> [Word; 2] {
        [
            u16::from(self.green) << 8 | u16::from(self.red),
            u16::from(self.power.to_byte()) << 8 | u16::from(self.blue),
        ]
    }

    fn from_words(words: [Word; 2]) -> Self {
        Self {
            red: words[0] as u8,
            green: (words[0] >> 8) as u8,
            blue: words[1] as u8,
            power: PowerState::from_byte((words[1] >> 8) as u8),
        }
    }
}

/// Bearer model configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BearerState {
    pub promiscuous: bool,
    pub enabled: u16,
    pub relay_active: u16,
}

impl BearerState {
    /// First-boot configuration derived from the user flags.
    fn from_flags(flags: u16) -> Self {
        let mut state = Self {
            promiscuous: false,
            enabled: BEARER_BLE_MASK,
            relay_active: 0,
        };
        if flags & FLAG_RELAY_ENABLE != 0 {
            state.relay_active |= BEARER_BLE_MASK;
        }
        if flags & FLAG_BRIDGE_ENABLE != 0 {
            state.enabled |= BEARER_GATT_SERVER_MASK;
            state.relay_active |= BEARER_GATT_SERVER_MASK;
        }
        state
    }

    fn to_words(self) -> [Word; 3] {
        [u16::from(self.promiscuous), self.enabled, self.relay_active]
    }

    fn from_words(words: [Word; 3]) -> Self {
        Self {
            promiscuous: words[0] != 0,
            enabled: words[1],
            relay_active: words[2],
        }
    }
}

/// RAM mirror of the application payload fields plus the deferred-write
/// state for the lamp word pair.
#[derive(Debug)]
pub struct AppStore {
    device_uuid: [Word; DEVICE_UUID_WORDS],
    auth_code: [Word; AUTH_CODE_WORDS],
    light_groups: [Word; MAX_MODEL_GROUPS],
    power_groups: [Word; MAX_MODEL_GROUPS],
    attention_groups: [Word; MAX_MODEL_GROUPS],
    lamp: LampState,
    bearer: BearerState,
    defer_timer: TimerSlot,
}

impl AppStore {
    /// Seed from NVM. On a fresh region every field gets its default and
    /// is written out; `rng` feeds the optional randomised device UUID.
    pub fn load(
        nvm: &mut dyn NvmStore,
        fresh: bool,
        config_flags: u16,
        rng: &mut dyn FnMut() -> u16,
    ) -> Result<Self, NvmError> {
        if fresh {
            let mut uuid = DEFAULT_DEVICE_UUID;
            if config_flags & FLAG_RANDOM_UUID != 0 {
                for word in uuid.iter_mut() {
                    *word = rng();
                }
            }
            let store = Self {
                device_uuid: uuid,
                auth_code: DEFAULT_AUTH_CODE,
                light_groups: [0; MAX_MODEL_GROUPS],
                power_groups: [0; MAX_MODEL_GROUPS],
                attention_groups: [0; MAX_MODEL_GROUPS],
                lamp: LampState::default(),
                bearer: BearerState::from_flags(config_flags),
                defer_timer: TimerSlot::new(),
            };
            store.write_all(nvm)?;
            info!("STORE: fresh payload written");
            return Ok(store);
        }

        let mut store = Self {
            device_uuid: [0; DEVICE_UUID_WORDS],
            auth_code: [0; AUTH_CODE_WORDS],
            light_groups: [0; MAX_MODEL_GROUPS],
            power_groups: [0; MAX_MODEL_GROUPS],
            attention_groups: [0; MAX_MODEL_GROUPS],
            lamp: LampState::default(),
            bearer: BearerState::default(),
            defer_timer: TimerSlot::new(),
        };
        nvm.read(Field::DeviceUuid.offset(), &mut store.device_uuid)?;
        nvm.read(Field::AuthCode.offset(), &mut store.auth_code)?;
        nvm.read(Field::LightModelGroups.offset(), &mut store.light_groups)?;
        nvm.read(Field::PowerModelGroups.offset(), &mut store.power_groups)?;
        nvm.read(Field::AttentionModelGroups.offset(), &mut store.attention_groups)?;
        let mut lamp = [0u16; 2];
        nvm.read(Field::RgbData.offset(), &mut lamp)?;
        store.lamp = LampState::from_words(lamp);
        let mut bearer = [0u16; 3];
        nvm.read(Field::BearerState.offset(), &mut bearer)?;
        store.bearer = BearerState::from_words(bearer);
        Ok(store)
    }

    fn write_all(&self, nvm: &mut dyn NvmStore) -> Result<(), NvmError> {
        nvm.write(Field::DeviceUuid.offset(), &self.device_uuid)?;
        nvm.write(Field::AuthCode.offset(), &self.auth_code)?;
        nvm.write(Field::LightModelGroups.offset(), &self.light_groups)?;
        nvm.write(Field::PowerModelGroups.offset(), &self.power_groups)?;
        nvm.write(Field::AttentionModelGroups.offset(), &self.attention_groups)?;
        nvm.write(Field::RgbData.offset(), &self.lamp.to_words())?;
        nvm.write(Field::BearerState.offset(), &self.bearer.to_words())
    }

    pub fn device_uuid(&self) -> &[Word; DEVICE_UUID_WORDS] {
        &self.device_uuid
    }

    pub fn auth_code(&self) -> &[Word; AUTH_CODE_WORDS] {
        &self.auth_code
    }

    pub fn lamp(&self) -> LampState {
        self.lamp
    }

    pub fn bearer(&self) -> BearerState {
        self.bearer
    }

    pub fn groups(&self, model: MeshModel) -> &[Word; MAX_MODEL_GROUPS] {
        match model {
            MeshModel::Light => &self.light_groups,
            MeshModel::Power => &self.power_groups,
            MeshModel::Attention => &self.attention_groups,
        }
    }

    /// Store one group assignment, written through at its table slot.
    pub fn set_group(
        &mut self,
        nvm: &mut dyn NvmStore,
        model: MeshModel,
        index: u8,
        group_id: u16,
    ) -> Result<(), NvmError> {
        let index = usize::from(index);
        if index >= MAX_MODEL_GROUPS {
            return Err(NvmError::OutOfRange);
        }
        let (table, field) = match model {
            MeshModel::Light => (&mut self.light_groups, Field::LightModelGroups),
            MeshModel::Power => (&mut self.power_groups, Field::PowerModelGroups),
            MeshModel::Attention => (&mut self.attention_groups, Field::AttentionModelGroups),
        };
        table[index] = group_id;
        nvm.write(field.offset() + index, &[group_id])?;
        debug!("STORE: {:?} group[{}] = {:#06x}", model, index, group_id);
        Ok(())
    }

    /// Update the lamp payload. The NVM write is debounced: rapid colour
    /// fades keep replacing the pending timer and only the final state
    /// lands in flash.
    pub fn set_lamp(&mut self, timers: &mut dyn TimerService, lamp: LampState) {
        self.lamp = lamp;
        self.defer_timer.arm(timers, NVM_WRITE_DEFER_DURATION);
    }

    /// Deferred-write timer routing. Returns whether the token was ours.
    pub fn on_timer(&mut self, nvm: &mut dyn NvmStore, token: TimerToken) -> Result<bool, NvmError> {
        if !self.defer_timer.try_claim(token) {
            return Ok(false);
        }
        self.flush_lamp(nvm)?;
        Ok(true)
    }

    /// Write the lamp payload out now, skipping the write when NVM
    /// already holds the current value.
    pub fn flush_lamp(&mut self, nvm: &mut dyn NvmStore) -> Result<(), NvmError> {
        self.defer_timer.disarm();
        let mut stored = [0u16; 2];
        nvm.read(Field::RgbData.offset(), &mut stored)?;
        let current = self.lamp.to_words();
        if stored != current {
            nvm.write(Field::RgbData.offset(), &current)?;
            debug!("STORE: lamp payload flushed");
        }
        Ok(())
    }

    /// Store the bearer configuration, written through.
    pub fn set_bearer(&mut self, nvm: &mut dyn NvmStore, bearer: BearerState) -> Result<(), NvmError> {
        self.bearer = bearer;
        nvm.write(Field::BearerState.offset(), &bearer.to_words())
    }
}
