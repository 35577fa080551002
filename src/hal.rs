//! Platform collaborator traits
//!
//! The drivers in this crate sequence power rails, clocks and Type-C port
//! state that the host platform owns. These traits are the seam: the host
//! implements them over its regulator framework, clock tree and USB stack,
//! and the drivers call them during connect/disconnect and power sequencing.
//!
//! Collaborator errors only need `Debug`; drivers log the failure where it
//! happens and surface a coarse error class to the caller.

use core::fmt::Debug;

/// A switchable supply rail
pub trait Regulator {
    type Error: Debug;

    fn enable(&mut self) -> Result<(), Self::Error>;
    fn disable(&mut self) -> Result<(), Self::Error>;
    fn is_enabled(&mut self) -> Result<bool, Self::Error>;
}

/// A gateable, rate-settable clock output
pub trait ClockSource {
    type Error: Debug;

    /// Current output rate in Hz
    fn rate(&self) -> u32;
    fn set_rate(&mut self, hz: u32) -> Result<(), Self::Error>;
    fn enable(&mut self) -> Result<(), Self::Error>;
    fn disable(&mut self);
}

/// Power role on the Type-C connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerRole {
    Sink,
    Source,
}

/// Data role on the Type-C connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataRole {
    Device,
    Host,
}

/// Role requested from the USB controller mux
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbRole {
    None,
    Device,
    Host,
}

/// Current advertisement decoded from the CC lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerOpMode {
    /// Default USB current
    Usb,
    /// Type-C 1.5 A advertisement
    Current1_5A,
    /// Type-C 3.0 A advertisement
    Current3_0A,
}

/// Charger type reported by BC1.2 detection on the input supply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbBcType {
    /// Standard downstream port
    Sdp,
    /// Charging downstream port
    Cdp,
    /// Dedicated charging port
    Dcp,
    Unknown,
}

/// Host-side view of the Type-C port
///
/// Role notifications mirror chip state outward and cannot fail; the USB mux
/// switch and partner registration can.
pub trait TypecPort {
    type Error: Debug;

    fn set_pwr_opmode(&mut self, mode: PowerOpMode);
    fn set_pwr_role(&mut self, role: PowerRole);
    fn set_vconn_role(&mut self, role: PowerRole);
    fn set_data_role(&mut self, role: DataRole);

    fn usb_role(&self) -> UsbRole;
    fn set_usb_role(&mut self, role: UsbRole) -> Result<(), Self::Error>;

    fn register_partner(&mut self) -> Result<(), Self::Error>;
    fn unregister_partner(&mut self);
}

/// Input power path fed from VBUS
pub trait VbusInSupply {
    type Error: Debug;

    fn set_current_limit_ua(&mut self, ua: u32) -> Result<(), Self::Error>;
    fn set_online(&mut self, online: bool) -> Result<(), Self::Error>;
    /// Enable or disable BC1.2 charger detection
    fn set_bc_enabled(&mut self, enabled: bool) -> Result<(), Self::Error>;
    fn bc_enabled(&mut self) -> Result<bool, Self::Error>;
    /// Charger type from the last BC1.2 detection run
    fn usb_type(&mut self) -> Result<UsbBcType, Self::Error>;
}
