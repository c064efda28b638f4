//! Application Configuration
//!
//! GAP timing constants, preferred and compatibility connection parameter
//! sets, NVM region constants and the per-variant application profiles
//! (heart-rate sensor, mesh light, mesh switch, mesh bridge).

use embassy_time::Duration;

use crate::ble::gap::ConnParamRange;

/// Fast (connectable) advertising interval.
pub const FAST_ADVERT_INTERVAL: Duration = Duration::from_millis(60);

/// Reduced-power advertising interval.
pub const SLOW_ADVERT_INTERVAL: Duration = Duration::from_millis(1280);

/// How long the heart-rate profile stays in fast advertising before
/// dropping to slow advertising.
pub const FAST_ADVERT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long the heart-rate profile stays in slow advertising before
/// going idle.
pub const SLOW_ADVERT_TIMEOUT: Duration = Duration::from_secs(60);

/// Preferred connection interval, in 1.25 ms units (1 s).
pub const PREFERRED_MIN_CON_INTERVAL: u16 = 0x0320;
pub const PREFERRED_MAX_CON_INTERVAL: u16 = 0x0320;

/// Preferred slave latency, in connection intervals.
pub const PREFERRED_SLAVE_LATENCY: u16 = 0x0000;

/// Preferred supervision timeout, in 10 ms units (6 s).
pub const PREFERRED_SUPERVISION_TIMEOUT: u16 = 0x0258;

/* Some widely deployed central stacks reject the 1 s preferred interval
 * outright. Attempts 3 and 4 of the update ladder fall back to these
 * looser values, which satisfy the iOS design-guideline constraints.
 */

/// Compatibility connection interval, in 1.25 ms units (120-125 ms).
pub const COMPAT_MIN_CON_INTERVAL: u16 = 0x0060;
pub const COMPAT_MAX_CON_INTERVAL: u16 = 0x0064;

/// Compatibility slave latency, in connection intervals.
pub const COMPAT_SLAVE_LATENCY: u16 = 0x0004;

/// Compatibility supervision timeout, in 10 ms units (6 s).
pub const COMPAT_SUPERVISION_TIMEOUT: u16 = 0x0258;

/// Maximum number of parameter-update retries after a rejected request.
pub const MAX_CONN_PARAM_RETRIES: u8 = 2;

/// The update ladder is defined for this many attempts per connection;
/// further requests are abandoned until the next connection.
pub const MAX_CONN_PARAM_ATTEMPTS: u8 = 4;

/// TGAP(conn_pause_peripheral), Core Specification Addendum 3 Rev 2.
/// A peripheral must not start a Connection Parameter Update procedure
/// within this period after establishing a connection.
pub const TGAP_CPP_PERIOD: Duration = Duration::from_secs(1);

/// TGAP(conn_pause_central), Core Specification Addendum 3 Rev 2.
/// The update request is sent only after the central has been inactive
/// for this long.
pub const TGAP_CPC_PERIOD: Duration = Duration::from_secs(1);

/// TGAP(conn_param_timeout), Core 4.0 Vol 3 Part C section 9.3.9.2.
/// A slave must wait this long before retransmitting a rejected
/// Connection Parameter Update request.
pub const GAP_CONN_PARAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Period of the device-identification beacon sent while unassociated.
pub const DEVICE_ID_ADVERT_PERIOD: Duration = Duration::from_secs(5);

/// Debounce window for deferred NVM writes of lamp payload data.
pub const NVM_WRITE_DEFER_DURATION: Duration = Duration::from_secs(5);

/// User configuration flag: generate a random device UUID on first boot.
pub const FLAG_RANDOM_UUID: u16 = 0x0001;

/// User configuration flag: permanently enable mesh relay.
pub const FLAG_RELAY_ENABLE: u16 = 0x0002;

/// User configuration flag: permanently enable the mesh bridge bearer.
pub const FLAG_BRIDGE_ENABLE: u16 = 0x0004;

/// The preferred parameter window the negotiator checks live links
/// against.
pub const fn preferred_conn_params() -> ConnParamRange {
    ConnParamRange {
        min_interval: PREFERRED_MIN_CON_INTERVAL,
        max_interval: PREFERRED_MAX_CON_INTERVAL,
        latency: PREFERRED_SLAVE_LATENCY,
    }
}

/// Peripheral role implemented by this image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AppVariant {
    HeartRateSensor,
    MeshLight,
    MeshSwitch,
    MeshBridge,
}

/// What to do when an advertising round is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdvertFallback {
    /// Keep advertising in the current mode.
    Stay,
    /// Drop to slow advertising.
    Slow,
    /// Stop advertising altogether.
    Idle,
}

/// Per-variant behaviour payload for the shared state machine.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AppProfile {
    pub variant: AppVariant,
    /// Whether the image carries CSRmesh association state.
    pub mesh_capable: bool,
    /// Transition taken when fast advertising is cancelled.
    pub fast_advert_cancelled: AdvertFallback,
    /// Transition taken when slow advertising is cancelled.
    pub slow_advert_cancelled: AdvertFallback,
    /// Bounded advertising rounds (`None` advertises forever).
    pub fast_advert_timeout: Option<Duration>,
    pub slow_advert_timeout: Option<Duration>,
    /// User configuration flags sampled at first boot.
    pub config_flags: u16,
}

impl AppProfile {
    pub const fn heart_rate_sensor() -> Self {
        Self {
            variant: AppVariant::HeartRateSensor,
            mesh_capable: false,
            fast_advert_cancelled: AdvertFallback::Slow,
            slow_advert_cancelled: AdvertFallback::Idle,
            fast_advert_timeout: Some(FAST_ADVERT_TIMEOUT),
            slow_advert_timeout: Some(SLOW_ADVERT_TIMEOUT),
            config_flags: 0,
        }
    }

    /// Mesh variants advertise forever so the mesh bearer stays
    /// reachable.
    const fn mesh(variant: AppVariant, config_flags: u16) -> Self {
        Self {
            variant,
            mesh_capable: true,
            fast_advert_cancelled: AdvertFallback::Stay,
            slow_advert_cancelled: AdvertFallback::Stay,
            fast_advert_timeout: None,
            slow_advert_timeout: None,
            config_flags,
        }
    }

    pub const fn mesh_light() -> Self {
        Self::mesh(AppVariant::MeshLight, FLAG_RELAY_ENABLE)
    }

    pub const fn mesh_switch() -> Self {
        Self::mesh(AppVariant::MeshSwitch, 0)
    }

    pub const fn mesh_bridge() -> Self {
        Self::mesh(AppVariant::MeshBridge, FLAG_RELAY_ENABLE | FLAG_BRIDGE_ENABLE)
    }
}
