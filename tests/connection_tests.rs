//! Connection lifecycle tests: boot, advertising modes, connection
//! acceptance and rejection, and disconnect-reason recovery.

mod common;

use embassy_time::Duration;

use csr1010_mesh_firmware::ble::app::{AppState, INVALID_CID};
use csr1010_mesh_firmware::ble::events::{PairingStatus, StackEvent};
use csr1010_mesh_firmware::ble::gap::{AdvertKind, DisconnectReason};
use csr1010_mesh_firmware::config::AppProfile;
use csr1010_mesh_firmware::core::fault::FaultCode;

use common::*;

#[test]
fn boot_registers_database_and_waits_in_init() {
    let bench = Bench::boot(AppProfile::mesh_light());

    assert_eq!(bench.app().state(), AppState::Init);
    assert_eq!(bench.stack.db_registrations, 1);
    // Fresh region: the security manager is seeded with a zero
    // diversifier.
    assert_eq!(bench.stack.sm_init_div, Some(0));
    assert!(bench.stack.advert_starts.is_empty());
}

#[test]
fn db_registration_success_enters_fast_advertising() {
    let mut bench = Bench::boot(AppProfile::mesh_light());
    bench.to_fast_advertising();

    assert_eq!(bench.app().state(), AppState::FastAdvertising);
    assert_eq!(bench.stack.advert_starts, vec![(AdvertKind::Fast, false)]);
}

#[test]
fn db_registration_failure_is_fatal() {
    let mut bench = Bench::boot(AppProfile::mesh_light());
    bench.dispatch(StackEvent::AddDbCfm { success: false });

    assert_eq!(bench.stack.faults, vec![FaultCode::DbRegistration]);
    assert_eq!(bench.app().state(), AppState::Init);
}

#[test]
fn unbonded_connect_arms_negotiation_without_whitelist() {
    // A typical central sets up a 30 ms interval, violating the 1 s
    // preferred window: the negotiator arms; nothing touches the
    // whitelist.
    let bench = Bench::boot_and_connect(AppProfile::mesh_light(), public_addr(1), DEFAULT_PARAMS);

    assert_eq!(bench.app().state(), AppState::Connected);
    assert_eq!(bench.app().connection().cid, TEST_CID);
    assert!(bench.stack.whitelist.is_empty());

    // The discovery-pause timer is running.
    assert_eq!(bench.timers.last_period(), Duration::from_secs(1));

    // The mesh layer learned about the bearer slot and was started.
    assert!(bench
        .mesh
        .connection_notices
        .contains(&(TEST_CID, DEFAULT_PARAMS.interval)));
    assert!(bench.mesh.starts >= 1);
}

#[test]
fn compliant_connection_skips_negotiation() {
    let mut bench = Bench::boot(AppProfile::mesh_light());
    bench.to_fast_advertising();

    let timers_before = bench.timers.started.len();
    bench.connect(public_addr(1), COMPLIANT_PARAMS);

    assert_eq!(bench.app().state(), AppState::Connected);
    assert_eq!(bench.timers.started.len(), timers_before);
}

#[test]
fn connected_entry_stops_advertising() {
    let bench = Bench::boot_and_connect(AppProfile::mesh_light(), public_addr(1), DEFAULT_PARAMS);
    assert!(bench.stack.advert_stops >= 1);
}

#[test]
fn failed_connect_restarts_the_fast_advertising_round() {
    let mut bench = Bench::boot(AppProfile::mesh_light());
    bench.to_fast_advertising();

    bench.dispatch(StackEvent::ConnectCfm {
        success: false,
        cid: 0,
        peer: public_addr(9),
    });

    assert_eq!(bench.app().state(), AppState::FastAdvertising);
    // The failed attempt consumed the advertising round; a new one is
    // started.
    assert_eq!(
        bench.stack.advert_starts,
        vec![(AdvertKind::Fast, false), (AdvertKind::Fast, false)]
    );
    assert!(bench.stack.faults.is_empty());
}

#[test]
fn failed_connect_in_slow_advertising_switches_to_fast() {
    // Run the heart-rate profile down into slow advertising first.
    let mut bench = Bench::boot(AppProfile::heart_rate_sensor());
    bench.to_fast_advertising();
    bench.fire(bench.timers.last_token());
    bench.dispatch(StackEvent::CancelConnectCfm);
    assert_eq!(bench.app().state(), AppState::SlowAdvertising);

    bench.dispatch(StackEvent::ConnectCfm {
        success: false,
        cid: 0,
        peer: public_addr(9),
    });

    assert_eq!(bench.app().state(), AppState::FastAdvertising);
    assert_eq!(
        bench.stack.advert_starts.last(),
        Some(&(AdvertKind::Fast, false))
    );
}

#[test]
fn remote_disconnect_unbonded_goes_fast() {
    let mut bench =
        Bench::boot_and_connect(AppProfile::mesh_light(), public_addr(1), DEFAULT_PARAMS);

    bench.dispatch(StackEvent::DisconnectComplete {
        reason: DisconnectReason::RemoteHost,
    });

    assert_eq!(bench.app().state(), AppState::FastAdvertising);
    // Session data is fully reinitialised.
    assert_eq!(bench.app().connection().cid, INVALID_CID);
    assert_eq!(bench.app().connection().params.interval, 0);
    // The mesh layer saw the bearer slot close.
    assert!(bench.mesh.connection_notices.contains(&(INVALID_CID, 0)));
}

#[test]
fn remote_disconnect_bonded_goes_slow() {
    let mut bench =
        Bench::boot_and_connect(AppProfile::mesh_light(), public_addr(1), DEFAULT_PARAMS);
    bench.dispatch(StackEvent::PairingCompleteInd {
        status: PairingStatus::Success,
        peer: public_addr(1),
    });

    bench.dispatch(StackEvent::DisconnectComplete {
        reason: DisconnectReason::RemoteHost,
    });

    assert_eq!(bench.app().state(), AppState::SlowAdvertising);
    // Bonded to a public-address peer: slow adverts are whitelisted.
    assert_eq!(
        bench.stack.advert_starts.last(),
        Some(&(AdvertKind::Slow, true))
    );
}

#[test]
fn supervision_timeout_and_local_disconnect_go_fast() {
    for reason in [DisconnectReason::SupervisionTimeout, DisconnectReason::LocalHost] {
        let mut bench =
            Bench::boot_and_connect(AppProfile::mesh_light(), public_addr(1), DEFAULT_PARAMS);
        bench.dispatch(StackEvent::DisconnectComplete { reason });
        assert_eq!(bench.app().state(), AppState::FastAdvertising, "{:?}", reason);
    }
}

#[test]
fn unresolved_peer_is_disconnected_not_trusted() {
    // Bond to a resolvable-address peer first.
    let mut bench = Bench::boot(AppProfile::mesh_light());
    bench.stack.privacy_match = true;
    bench.to_fast_advertising();
    bench.connect(resolvable_addr(1), DEFAULT_PARAMS);
    bench.dispatch(StackEvent::PairingCompleteInd {
        status: PairingStatus::Success,
        peer: resolvable_addr(1),
    });
    bench.dispatch(StackEvent::DisconnectComplete {
        reason: DisconnectReason::RemoteHost,
    });
    assert_eq!(bench.app().state(), AppState::SlowAdvertising);

    // Reconnect with an address that fails identity resolution.
    bench.stack.privacy_match = false;
    bench.connect(resolvable_addr(7), DEFAULT_PARAMS);

    assert_eq!(bench.app().state(), AppState::Disconnecting);
    assert_eq!(bench.stack.disconnects, vec![TEST_CID]);
    assert!(bench.stack.privacy_queries >= 1);

    // The disconnect completes and the device recovers to advertising.
    bench.dispatch(StackEvent::DisconnectComplete {
        reason: DisconnectReason::LocalHost,
    });
    assert_eq!(bench.app().state(), AppState::FastAdvertising);
    assert!(bench.stack.faults.is_empty());
}

#[test]
fn bonded_boot_whitelists_peer_exactly_once_at_init_exit() {
    // Bond to a public-address peer, then power cycle.
    let mut bench =
        Bench::boot_and_connect(AppProfile::mesh_light(), public_addr(1), DEFAULT_PARAMS);
    bench.dispatch(StackEvent::PairingCompleteInd {
        status: PairingStatus::Success,
        peer: public_addr(1),
    });

    let nvm = bench.nvm;
    let mut rebooted = Bench::boot_with_nvm(AppProfile::mesh_light(), nvm);
    assert!(rebooted.stack.whitelist.is_empty());
    // The stored diversifier seeds the security manager again.
    assert_eq!(rebooted.stack.sm_init_div, Some(0));

    rebooted.to_fast_advertising();
    assert_eq!(rebooted.stack.whitelist, vec![public_addr(1)]);
    // Bonded adverts are whitelist-filtered.
    assert_eq!(
        rebooted.stack.advert_starts,
        vec![(AdvertKind::Fast, true)]
    );

    // A fresh pairing attempt on the next connection is still
    // authorised.
    rebooted.connect(public_addr(1), DEFAULT_PARAMS);
    rebooted.dispatch(StackEvent::PairingAuthInd { auth_handle: 0x77 });
    assert_eq!(rebooted.stack.auth_responses, vec![(0x77, true)]);
}

#[test]
fn whitelist_failure_on_init_exit_is_fatal() {
    let mut bench =
        Bench::boot_and_connect(AppProfile::mesh_light(), public_addr(1), DEFAULT_PARAMS);
    bench.dispatch(StackEvent::PairingCompleteInd {
        status: PairingStatus::Success,
        peer: public_addr(1),
    });

    let nvm = bench.nvm;
    let mut rebooted = Bench::boot_with_nvm(AppProfile::mesh_light(), nvm);
    rebooted.stack.whitelist_fail = true;
    rebooted.to_fast_advertising();

    assert_eq!(rebooted.stack.faults, vec![FaultCode::AddWhitelist]);
    // The fatal path stopped the transition before any mutation.
    assert_eq!(rebooted.app().state(), AppState::Init);
}

#[test]
fn heart_rate_profile_steps_down_fast_slow_idle() {
    let mut bench = Bench::boot(AppProfile::heart_rate_sensor());
    bench.to_fast_advertising();

    // The fast advertising round is bounded.
    assert_eq!(bench.timers.last_period(), Duration::from_secs(30));
    let fast_round = bench.timers.last_token();

    bench.fire(fast_round);
    assert!(bench.stack.advert_stops >= 1);

    bench.dispatch(StackEvent::CancelConnectCfm);
    assert_eq!(bench.app().state(), AppState::SlowAdvertising);
    assert_eq!(bench.timers.last_period(), Duration::from_secs(60));
    let slow_round = bench.timers.last_token();

    bench.fire(slow_round);
    bench.dispatch(StackEvent::CancelConnectCfm);
    assert_eq!(bench.app().state(), AppState::Idle);
}

#[test]
fn mesh_profiles_ignore_advert_cancellation() {
    let mut bench = Bench::boot(AppProfile::mesh_light());
    bench.to_fast_advertising();

    // The mesh layer cancels advert rounds all the time; the state
    // machine stays put.
    bench.dispatch(StackEvent::CancelConnectCfm);
    assert_eq!(bench.app().state(), AppState::FastAdvertising);
    assert!(bench.stack.faults.is_empty());
}

#[test]
fn attribute_reads_and_writes_are_answered() {
    use csr1010_mesh_firmware::ble::events::{
        AccessInd, ACCESS_PERMISSION, ACCESS_READ, ACCESS_WRITE, ACCESS_WRITE_COMPLETE,
    };
    use csr1010_mesh_firmware::ble::stack::AccessStatus;
    use heapless::Vec;

    let mut bench =
        Bench::boot_and_connect(AppProfile::mesh_light(), public_addr(1), DEFAULT_PARAMS);

    // A completed write is routed into the mesh control service.
    let mut value = Vec::new();
    value.extend_from_slice(&[0xC0, 0xDE]).unwrap();
    bench.dispatch(StackEvent::AccessInd(AccessInd {
        cid: TEST_CID,
        handle: 0x0030,
        flags: ACCESS_WRITE | ACCESS_WRITE_COMPLETE,
        value,
    }));
    assert_eq!(bench.mesh.writes, vec![(0x0030, vec![0xC0, 0xDE])]);

    // A read is answered from the mesh control service.
    bench.dispatch(StackEvent::AccessInd(AccessInd {
        cid: TEST_CID,
        handle: 0x0031,
        flags: ACCESS_READ | ACCESS_PERMISSION,
        value: Vec::new(),
    }));
    assert_eq!(bench.mesh.reads, vec![0x0031]);

    // Anything else is rejected, not faulted.
    bench.dispatch(StackEvent::AccessInd(AccessInd {
        cid: TEST_CID,
        handle: 0x0032,
        flags: 0,
        value: Vec::new(),
    }));
    assert_eq!(
        bench.stack.access_responses.last(),
        Some(&(TEST_CID, 0x0032, AccessStatus::RequestNotSupported))
    );
    assert!(bench.stack.faults.is_empty());
}

#[test]
fn cancel_confirm_while_connected_is_ignored() {
    let mut bench =
        Bench::boot_and_connect(AppProfile::mesh_light(), public_addr(1), DEFAULT_PARAMS);
    bench.dispatch(StackEvent::CancelConnectCfm);
    assert_eq!(bench.app().state(), AppState::Connected);
    assert!(bench.stack.faults.is_empty());
}
