//! Event Dispatch Shim
//!
//! The boundary adapter between the radio-stack callback surface and the
//! state machine. It owns the single [`App`] instance, maps inbound
//! events onto handler calls, and is the one place a fatal condition is
//! reported to the platform.

use log::{error, trace};

use crate::ble::app::{App, Services};
use crate::ble::events::StackEvent;
use crate::config::AppProfile;
use crate::core::fault::FaultCode;
use crate::mesh::MeshEvent;

/// Owns the application core and feeds it events.
#[derive(Debug)]
pub struct Dispatcher {
    app: App,
}

impl Dispatcher {
    /// Run the boot sequence and wrap the resulting core. A boot-time
    /// NVM failure is returned for the platform entry point to report.
    pub fn boot(profile: AppProfile, svc: &mut Services<'_>) -> Result<Self, FaultCode> {
        App::boot(profile, svc).map(|app| Self { app })
    }

    pub fn app(&self) -> &App {
        &self.app
    }

    pub fn app_mut(&mut self) -> &mut App {
        &mut self.app
    }

    /// Route one radio-stack event (or timer expiry). Fatal conditions
    /// funnel through the platform's fault latch exactly once.
    pub fn dispatch(&mut self, svc: &mut Services<'_>, event: StackEvent) {
        trace!("DISPATCH: {:?}", event);
        if let Err(code) = self.app.handle(svc, event) {
            error!("DISPATCH: fatal condition {:?}", code);
            svc.stack.report_fault(code);
        }
    }

    /// Route one mesh-layer event.
    pub fn dispatch_mesh(&mut self, svc: &mut Services<'_>, event: MeshEvent) {
        trace!("DISPATCH: mesh {:?}", event);
        if let Err(code) = self.app.on_mesh_event(svc, event) {
            error!("DISPATCH: fatal condition {:?}", code);
            svc.stack.report_fault(code);
        }
    }
}
