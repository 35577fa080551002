//! ANX7688 USB-C bridge driver
//!
//! Control-plane driver for the Analogix ANX7688 on the PinePhone: cable
//! detection, power sequencing, the message interface to the on-chip
//! controller (OCM) and mirroring of connection state out to the host's
//! Type-C port and charger. The HDMI-to-DP conversion path runs entirely in
//! the chip's firmware.
//!
//! The driver is single-context and clock-driven by the host: cable detect
//! edges arrive through [`Anx7688::cable_irq`], the chip interrupt through
//! [`Anx7688::status_irq`], and deferred work runs from [`Anx7688::tick`],
//! all with caller-supplied monotonic milliseconds. Cable edges are
//! debounced by scheduling the evaluation 10 ms out and rescheduling on
//! every edge; a 1 s safety-net poll re-evaluates state even when an edge
//! is lost.

mod eeprom;
mod ocm;
mod registers;

pub use ocm::{
    pdo_fixed, OCM_FRAME_SIZE, OCM_MAX_PAYLOAD, PDO_FIXED_DATA_SWAP, PDO_FIXED_DUAL_ROLE,
    PDO_FIXED_USB_COMM,
};
pub use registers::*;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::i2c::I2c;

use crate::error::{Error, ProtocolError, TimeoutError};
use crate::hal::{
    DataRole, PowerOpMode, PowerRole, Regulator, TypecPort, UsbBcType, UsbRole, VbusInSupply,
};

/// Always-on supply rails in power-on order
const CORE_SUPPLY_NAMES: [&str; 6] = [
    "AVDD33", "AVDD18", "DVDD18", "AVDD10", "DVDD10", "HDMI_VT",
];

/// DisplayPort sink identity announced to the OCM: ID header, cert stat,
/// product type, DP capabilities
const DP_SNK_IDENTITY: [u8; 16] = [
    0x00, 0x00, 0x00, 0xec, // id header
    0x00, 0x00, 0x00, 0x00, // cert stat
    0x00, 0x00, 0x00, 0x00, // product type
    0x39, 0x00, 0x00, 0x51, // alt mode adapter
];

/// SVID announced to the OCM (DisplayPort, 0xff01)
const DP_SNK_SVID: [u8; 4] = [0x00, 0x00, 0x01, 0xff];

/// Connection progress of the Type-C port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No cable, chip unpowered
    Disconnected,
    /// Cable seen, chip powering up
    Connecting,
    /// Waiting for the OCM to load its firmware from EEPROM
    FirmwareLoading,
    /// OCM configured, partner registered
    Connected,
    /// Chip held with the OCM in reset for direct EEPROM access
    FirmwareFlashing,
}

/// One-shot deadline timer driven by caller-supplied time.
///
/// Scheduling while armed replaces the pending deadline, which is what
/// debouncing a bouncing input needs.
#[derive(Debug, Default)]
struct Debounce {
    deadline: Option<u64>,
}

impl Debounce {
    fn schedule(&mut self, at_ms: u64) {
        self.deadline = Some(at_ms);
    }

    /// Disarm and report whether the deadline passed
    fn fire(&mut self, now_ms: u64) -> bool {
        match self.deadline {
            Some(at) if now_ms >= at => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// ANX7688 bridge driver
pub struct Anx7688<I2C, D, RST, EN, CD, PORT, PSY, R> {
    i2c: I2C,
    delay: D,
    addr: u8,
    tcpc_addr: u8,
    core_supplies: [R; 6],
    vconn_supply: R,
    vbus_supply: R,
    gpio_reset: RST,
    gpio_enable: EN,
    gpio_cabledet: CD,
    port: PORT,
    vbus_in: PSY,

    state: ConnectionState,
    powered: bool,
    fw_failed: bool,
    psy_change: bool,
    vbus_on: bool,
    vconn_on: bool,
    current_limit_ua: u32,

    last_status: Option<u8>,
    last_cc_status: Option<u8>,
    last_dp_state: Option<u8>,
    last_bc_result: Option<UsbBcType>,

    work: Debounce,
    next_poll_at: u64,
}

impl<I2C, D, RST, EN, CD, PORT, PSY, R> Anx7688<I2C, D, RST, EN, CD, PORT, PSY, R>
where
    I2C: I2c,
    D: DelayNs,
    RST: OutputPin,
    EN: OutputPin,
    CD: InputPin,
    PORT: TypecPort,
    PSY: VbusInSupply,
    R: Regulator,
{
    /// Create a new ANX7688 driver instance
    ///
    /// `core_supplies` are the always-on rails in the order of
    /// [`CORE_SUPPLY_NAMES`]; VCONN and the VBUS source rail are switched by
    /// the driver as the connection changes.
    pub fn new(
        i2c: I2C,
        delay: D,
        core_supplies: [R; 6],
        vconn_supply: R,
        vbus_supply: R,
        gpio_reset: RST,
        gpio_enable: EN,
        gpio_cabledet: CD,
        port: PORT,
        vbus_in: PSY,
    ) -> Self {
        Self {
            i2c,
            delay,
            addr: ANX7688_I2C_ADDRESS,
            tcpc_addr: ANX7688_TCPC_I2C_ADDRESS,
            core_supplies,
            vconn_supply,
            vbus_supply,
            gpio_reset,
            gpio_enable,
            gpio_cabledet,
            port,
            vbus_in,
            state: ConnectionState::Disconnected,
            powered: false,
            fw_failed: false,
            psy_change: false,
            vbus_on: false,
            vconn_on: false,
            current_limit_ua: 0,
            last_status: None,
            last_cc_status: None,
            last_dp_state: None,
            last_bc_result: None,
            work: Debounce::default(),
            next_poll_at: u64::MAX,
        }
    }

    // ========================================
    // Register access
    // ========================================

    fn read_reg(&mut self, addr: u8, reg: u8) -> Result<u8, Error<I2C::Error>> {
        let mut buf = [0u8];
        self.i2c.write_read(addr, &[reg], &mut buf).map_err(|e| {
            log::error!("read failed: dev={:02x} reg={:02x}", addr, reg);
            Error::Bus(e)
        })?;
        Ok(buf[0])
    }

    fn read_block(&mut self, addr: u8, reg: u8, buf: &mut [u8]) -> Result<(), Error<I2C::Error>> {
        self.i2c.write_read(addr, &[reg], buf).map_err(|e| {
            log::error!("read failed: dev={:02x} reg={:02x} len={}", addr, reg, buf.len());
            Error::Bus(e)
        })
    }

    fn write_block(&mut self, addr: u8, reg: u8, data: &[u8]) -> Result<(), Error<I2C::Error>> {
        let mut buf = [0u8; ocm::OCM_FRAME_SIZE + 1];
        if data.len() > ocm::OCM_FRAME_SIZE {
            return Err(Error::Protocol(ProtocolError::OversizedTransfer));
        }

        buf[0] = reg;
        buf[1..=data.len()].copy_from_slice(data);

        self.i2c.write(addr, &buf[..=data.len()]).map_err(|e| {
            log::error!("write failed: dev={:02x} reg={:02x} len={}", addr, reg, data.len());
            Error::Bus(e)
        })
    }

    /// Read a register on the firmware interface
    pub fn read_register(&mut self, reg: u8) -> Result<u8, Error<I2C::Error>> {
        self.read_reg(self.addr, reg)
    }

    /// Write a register on the firmware interface
    pub fn write_register(&mut self, reg: u8, val: u8) -> Result<(), Error<I2C::Error>> {
        self.write_block(self.addr, reg, &[val])
    }

    /// Read a register on the TCPC interface
    pub fn tcpc_read_register(&mut self, reg: u8) -> Result<u8, Error<I2C::Error>> {
        self.read_reg(self.tcpc_addr, reg)
    }

    /// Write a register on the TCPC interface
    pub fn tcpc_write_register(&mut self, reg: u8, val: u8) -> Result<(), Error<I2C::Error>> {
        self.write_block(self.tcpc_addr, reg, &[val])
    }

    fn update_register_bits(
        &mut self,
        reg: u8,
        mask: u8,
        val: u8,
    ) -> Result<(), Error<I2C::Error>> {
        let mut tmp = self.read_register(reg)?;
        tmp &= !mask;
        tmp |= val & mask;
        self.write_register(reg, tmp)
    }

    // ========================================
    // Power sequencing
    // ========================================

    fn power_enable(&mut self) {
        self.gpio_reset.set_high().ok();
        self.gpio_enable.set_high().ok();
        self.delay.delay_ms(10);
        self.gpio_reset.set_low().ok();
        self.delay.delay_us(2);

        self.powered = true;
        log::debug!("power enabled");
    }

    fn power_disable(&mut self) {
        self.gpio_reset.set_high().ok();
        self.delay.delay_ms(5);
        self.gpio_enable.set_low().ok();

        self.powered = false;
        log::debug!("power disabled");
    }

    /// Whether the chip is powered
    pub fn is_powered(&self) -> bool {
        self.powered
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether a firmware load timed out; blocks reconnects until a
    /// successful flash clears it
    pub fn fw_failed(&self) -> bool {
        self.fw_failed
    }

    // ========================================
    // OCM message interface
    // ========================================

    /// Send a message to the on-chip controller and wait for it to be
    /// consumed.
    pub fn send_ocm_message(&mut self, cmd: u8, payload: &[u8]) -> Result<(), Error<I2C::Error>> {
        let mut frame = [0u8; ocm::OCM_FRAME_SIZE];
        let n = ocm::encode_frame(cmd, payload, &mut frame).map_err(Error::Protocol)?;

        if self.tcpc_read_register(ANX7688_TCPC_REG_INTERFACE_SEND)? != 0 {
            log::warn!("OCM send window busy");
            return Err(Error::Timeout(TimeoutError::SendWindow));
        }

        self.write_block(self.tcpc_addr, ANX7688_TCPC_REG_INTERFACE_SEND, &frame[..n])?;

        for _ in 0..ANX7688_OCM_SEND_TRIES {
            if self.tcpc_read_register(ANX7688_TCPC_REG_INTERFACE_SEND)? == 0 {
                log::debug!("OCM message sent: cmd={:02x}", cmd);
                return Ok(());
            }
            self.delay.delay_us(ANX7688_OCM_SEND_POLL_US);
        }

        log::warn!("OCM send window never drained: cmd={:02x}", cmd);
        Err(Error::Timeout(TimeoutError::SendWindow))
    }

    fn receive_msg(&mut self) -> Result<(), Error<I2C::Error>> {
        let mut frame = [0u8; ocm::OCM_FRAME_SIZE];
        self.read_block(self.tcpc_addr, ANX7688_TCPC_REG_INTERFACE_RECV, &mut frame)?;

        // release the window before acting on the message
        self.tcpc_write_register(ANX7688_TCPC_REG_INTERFACE_RECV, 0)?;

        let (cmd, payload) = ocm::parse_frame(&frame).map_err(|e| {
            log::warn!("corrupt OCM message: {:02x?}", frame);
            Error::Protocol(e)
        })?;

        self.handle_pd_message(cmd, payload);
        Ok(())
    }

    /// The OCM runs the PD policy engine itself; messages it forwards are
    /// informational for now.
    fn handle_pd_message(&mut self, cmd: u8, payload: &[u8]) {
        match cmd {
            OCM_MSG_PWR_SRC_CAP => log::debug!("PD: source capabilities ({}B)", payload.len()),
            OCM_MSG_PWR_SNK_CAP => log::debug!("PD: sink capabilities ({}B)", payload.len()),
            OCM_MSG_PWR_OBJ_REQ => log::debug!("PD: power object request"),
            OCM_MSG_ACCEPT => log::debug!("PD: accept"),
            OCM_MSG_REJECT => log::debug!("PD: reject"),
            OCM_MSG_DP_SNK_CFG => log::debug!("PD: DP sink config"),
            OCM_MSG_DP_ALT_ENTER => log::debug!("PD: DP alt mode entered"),
            OCM_MSG_DP_ALT_EXIT => log::debug!("PD: DP alt mode exited"),
            OCM_MSG_VDM => log::debug!("PD: VDM ({}B)", payload.len()),
            OCM_MSG_RESPONSE_TO_REQ => log::debug!("PD: response to request"),
            OCM_MSG_SOFT_RST => log::debug!("PD: soft reset"),
            OCM_MSG_HARD_RST => log::debug!("PD: hard reset"),
            OCM_MSG_RESTART => log::debug!("PD: restart"),
            _ => log::warn!("unhandled OCM message: cmd={:02x}", cmd),
        }
    }

    // ========================================
    // Connect / disconnect
    // ========================================

    fn connect(&mut self) -> Result<(), Error<I2C::Error>> {
        log::debug!("cable inserted");

        self.last_status = None;
        self.last_cc_status = None;
        self.last_dp_state = None;
        self.state = ConnectionState::Connecting;

        self.delay.delay_ms(10);
        self.power_enable();

        if let Err(e) = self.vconn_supply.enable() {
            log::error!("failed to enable vconn: {:?}", e);
            self.power_disable();
            self.state = ConnectionState::Disconnected;
            return Err(Error::Supply);
        }
        self.vconn_on = true;

        let ret = self.connect_inner();
        if ret.is_err() {
            if let Err(e) = self.vconn_supply.disable() {
                log::warn!("failed to disable vconn: {:?}", e);
            }
            self.vconn_on = false;
            self.power_disable();
            self.state = ConnectionState::Disconnected;
        }
        ret
    }

    fn connect_inner(&mut self) -> Result<(), Error<I2C::Error>> {
        self.state = ConnectionState::FirmwareLoading;

        let mut loaded = false;
        for i in 0..ANX7688_FW_LOAD_TRIES {
            let status = self.read_register(ANX7688_REG_EEPROM_LOAD_STATUS0)?;
            if status & ANX7688_EEPROM_FW_LOADED != 0 {
                log::debug!("firmware loaded after ~{} ms", i * ANX7688_FW_LOAD_POLL_MS);
                loaded = true;
                break;
            }
            self.delay.delay_ms(ANX7688_FW_LOAD_POLL_MS);
        }
        if !loaded {
            log::error!("firmware load timed out, flash new firmware to recover");
            self.fw_failed = true;
            return Err(Error::Timeout(TimeoutError::FirmwareLoad));
        }

        let version = self.firmware_version()?;
        log::info!("firmware version {:04x}", version);

        // clear and unmask the soft interrupt path
        self.write_register(ANX7688_REG_STATUS_INT, 0)?;
        self.write_register(ANX7688_REG_STATUS_INT_MASK, !ANX7688_SOFT_INT_MASK)?;
        self.write_register(ANX7688_REG_IRQ_EXT_SOURCE2, 0xff)?;
        self.write_register(ANX7688_REG_IRQ_EXT_MASK2, !ANX7688_IRQ2_SOFT_INT)?;

        // timing and sink policy
        self.write_register(ANX7688_REG_VBUS_OFF_DELAY_TIME, 25)?; // 100 ms
        self.write_register(ANX7688_REG_TRY_UFP_TIMER, 150)?; // 300 ms
        self.write_register(ANX7688_REG_MAX_VOLTAGE, 50)?; // 5.0 V
        self.write_register(ANX7688_REG_MAX_POWER, 30)?; // 15 W
        self.write_register(ANX7688_REG_MIN_POWER, 1)?; // 0.5 W
        self.write_register(ANX7688_REG_FEATURE_CTRL, 0x1e)?;

        let flags = ocm::PDO_FIXED_DUAL_ROLE | ocm::PDO_FIXED_USB_COMM | ocm::PDO_FIXED_DATA_SWAP;
        let src_cap = ocm::pdo_fixed(5000, 500, flags).to_le_bytes();
        let snk_cap = ocm::pdo_fixed(5000, 3000, flags).to_le_bytes();

        self.send_ocm_message(OCM_MSG_PWR_SRC_CAP, &src_cap)?;
        self.send_ocm_message(OCM_MSG_PWR_SNK_CAP, &snk_cap)?;
        self.send_ocm_message(OCM_MSG_DP_SNK_IDENTITY, &DP_SNK_IDENTITY)?;
        self.send_ocm_message(OCM_MSG_SVID, &DP_SNK_SVID)?;

        log::debug!("OCM configured");

        self.port.register_partner().map_err(|e| {
            log::error!("failed to register partner: {:?}", e);
            Error::Port
        })?;

        self.state = ConnectionState::Connected;
        Ok(())
    }

    fn disconnect(&mut self) {
        log::debug!("cable removed");

        if self.vconn_on {
            if let Err(e) = self.vconn_supply.disable() {
                log::warn!("failed to disable vconn: {:?}", e);
            }
            self.vconn_on = false;
        }
        if self.vbus_on {
            if let Err(e) = self.vbus_supply.disable() {
                log::warn!("failed to disable vbus: {:?}", e);
            }
            self.vbus_on = false;
        }

        self.power_disable();

        self.port.unregister_partner();
        self.port.set_pwr_opmode(PowerOpMode::Usb);
        self.port.set_pwr_role(PowerRole::Sink);
        self.port.set_vconn_role(PowerRole::Sink);
        self.port.set_data_role(DataRole::Device);
        if let Err(e) = self.port.set_usb_role(UsbRole::None) {
            log::warn!("failed to set usb role: {:?}", e);
        }

        self.current_limit_ua = 0;
        if let Err(e) = self.vbus_in.set_current_limit_ua(ANX7688_DEFAULT_CURRENT_LIMIT_UA) {
            log::warn!("failed to set current limit: {:?}", e);
        }
        if let Err(e) = self.vbus_in.set_online(false) {
            log::warn!("failed to offline vbus_in: {:?}", e);
        }
        if let Err(e) = self.vbus_in.set_bc_enabled(true) {
            log::warn!("failed to re-enable BC1.2: {:?}", e);
        }

        self.state = ConnectionState::Disconnected;
    }

    fn handle_cable_change(&mut self) {
        let detected = match self.gpio_cabledet.is_high() {
            Ok(v) => v,
            Err(e) => {
                log::warn!("cable detect read failed: {:?}", e);
                return;
            }
        };

        if detected && self.state == ConnectionState::Disconnected {
            if let Err(e) = self.connect() {
                log::error!("connect failed: {:?}", e);
            }
        } else if !detected && self.state == ConnectionState::Connected {
            self.disconnect();
        }
    }

    // ========================================
    // Status mirroring
    // ========================================

    fn update_status(&mut self) -> Result<(), Error<I2C::Error>> {
        let status = self.read_register(ANX7688_REG_STATUS)?;
        let cc_status = self.read_register(ANX7688_REG_CC_STATUS)?;
        let dp_state = self.tcpc_read_register(ANX7688_TCPC_REG_DP_STATE)?;

        if self.last_status != Some(status) {
            self.last_status = Some(status);
            log::debug!("status changed to {:02x}", status);
        }

        // reconcile against the vbus_on/vconn_on mirrors rather than the
        // status-changed gate, so a failed regulator switch is retried on
        // the next poll even when the status byte has not moved
        let vbus_on = status & ANX7688_STATUS_VBUS_ON != 0;
        if vbus_on != self.vbus_on {
            let ret = if vbus_on {
                self.vbus_supply.enable()
            } else {
                self.vbus_supply.disable()
            };
            if let Err(e) = ret {
                log::error!("failed to switch vbus rail: {:?}", e);
                return Err(Error::Supply);
            }

            self.vbus_on = vbus_on;
            self.port.set_pwr_role(if vbus_on {
                PowerRole::Source
            } else {
                PowerRole::Sink
            });
        }

        let vconn_on = status & ANX7688_STATUS_VCONN_ON != 0;
        if vconn_on != self.vconn_on {
            let ret = if vconn_on {
                self.vconn_supply.enable()
            } else {
                self.vconn_supply.disable()
            };
            if let Err(e) = ret {
                log::error!("failed to switch vconn rail: {:?}", e);
                return Err(Error::Supply);
            }

            self.vconn_on = vconn_on;
            self.port.set_vconn_role(if vconn_on {
                PowerRole::Source
            } else {
                PowerRole::Sink
            });
        }

        let data_role = if status & ANX7688_STATUS_DATA_ROLE_DFP != 0 {
            DataRole::Host
        } else {
            DataRole::Device
        };
        self.port.set_data_role(data_role);

        let usb_role = match data_role {
            DataRole::Host => UsbRole::Host,
            DataRole::Device => UsbRole::Device,
        };
        if self.port.usb_role() != usb_role {
            self.port.set_usb_role(usb_role).map_err(|e| {
                log::error!("failed to set usb role: {:?}", e);
                Error::Port
            })?;
        }

        if self.last_cc_status != Some(cc_status) {
            self.last_cc_status = Some(cc_status);
            log::debug!("cc_status changed to {:02x}", cc_status);
            self.update_cc_status(cc_status);
        }

        if self.last_dp_state != Some(dp_state) {
            self.last_dp_state = Some(dp_state);
            log::debug!("dp_state changed to {:02x}", dp_state);
        }

        Ok(())
    }

    fn decode_cc(nibble: u8) -> Option<PowerOpMode> {
        match nibble {
            0x4 => Some(PowerOpMode::Usb),
            0x8 => Some(PowerOpMode::Current1_5A),
            0xc => Some(PowerOpMode::Current3_0A),
            _ => None,
        }
    }

    /// Apply a changed CC termination: an explicit 1.5 A/3 A advertisement
    /// beats BC1.2 detection; at default current the limit comes from BC1.2.
    fn update_cc_status(&mut self, cc_status: u8) {
        let mode = Self::decode_cc(cc_status & 0xf).or_else(|| Self::decode_cc(cc_status >> 4));
        let Some(mode) = mode else {
            // no Rp seen on either CC pin yet
            return;
        };

        self.current_limit_ua = match mode {
            PowerOpMode::Usb => 0,
            PowerOpMode::Current1_5A => 1_500_000,
            PowerOpMode::Current3_0A => 3_000_000,
        };

        if self.current_limit_ua > 0 {
            if let Err(e) = self.vbus_in.set_bc_enabled(false) {
                log::warn!("failed to disable BC1.2: {:?}", e);
            }
            if let Err(e) = self.vbus_in.set_current_limit_ua(self.current_limit_ua) {
                log::warn!("failed to set current limit: {:?}", e);
            }
        } else {
            match self.vbus_in.bc_enabled() {
                Ok(true) => {} // BC1.2 detection will set the limit
                _ => {
                    if let Err(e) =
                        self.vbus_in.set_current_limit_ua(ANX7688_DEFAULT_CURRENT_LIMIT_UA)
                    {
                        log::warn!("failed to set current limit: {:?}", e);
                    }
                }
            }
        }

        if let Err(e) = self.vbus_in.set_online(true) {
            log::warn!("failed to online vbus_in: {:?}", e);
        }
        self.port.set_pwr_opmode(mode);
    }

    fn handle_vbus_in_change(&mut self) {
        let bc = match self.vbus_in.usb_type() {
            Ok(t) => t,
            Err(e) => {
                log::warn!("failed to read BC1.2 result: {:?}", e);
                return;
            }
        };

        if self.last_bc_result == Some(bc) {
            return;
        }
        self.last_bc_result = Some(bc);

        // only meaningful at default current; an explicit Rp advertisement
        // already pinned the limit and disabled detection
        if self.current_limit_ua > 0 {
            return;
        }

        let limit_ua = match bc {
            UsbBcType::Cdp => 1_500_000,
            UsbBcType::Dcp => 2_000_000,
            UsbBcType::Sdp | UsbBcType::Unknown => ANX7688_DEFAULT_CURRENT_LIMIT_UA,
        };

        log::debug!("BC1.2 detected {:?}, limit {} uA", bc, limit_ua);
        if let Err(e) = self.vbus_in.set_current_limit_ua(limit_ua) {
            log::warn!("failed to set current limit: {:?}", e);
        }
    }

    // ========================================
    // Host entry points
    // ========================================

    /// Power-cycle the chip once to verify it answers, set safe initial
    /// port/charger state and schedule the first cable evaluation.
    pub fn probe(&mut self, now_ms: u64) -> Result<(), Error<I2C::Error>> {
        for (i, supply) in self.core_supplies.iter_mut().enumerate() {
            if let Err(e) = supply.enable() {
                log::error!("failed to enable {}: {:?}", CORE_SUPPLY_NAMES[i], e);
                return Err(Error::Supply);
            }
        }

        self.delay.delay_ms(10);
        self.power_enable();
        let ret = self.identify();
        self.power_disable();
        ret?;

        self.port.set_pwr_opmode(PowerOpMode::Usb);
        self.port.set_pwr_role(PowerRole::Sink);
        self.port.set_vconn_role(PowerRole::Sink);
        self.port.set_data_role(DataRole::Device);

        if let Err(e) = self.vbus_in.set_bc_enabled(true) {
            log::warn!("failed to enable BC1.2: {:?}", e);
        }
        if let Err(e) = self.vbus_in.set_current_limit_ua(ANX7688_DEFAULT_CURRENT_LIMIT_UA) {
            log::warn!("failed to set current limit: {:?}", e);
        }

        self.work.schedule(now_ms + ANX7688_CABLE_DEBOUNCE_MS);
        self.next_poll_at = now_ms + ANX7688_POLL_INTERVAL_MS;
        Ok(())
    }

    fn identify(&mut self) -> Result<(), Error<I2C::Error>> {
        let lo = self.tcpc_read_register(ANX7688_TCPC_REG_VENDOR_ID0)?;
        let hi = self.tcpc_read_register(ANX7688_TCPC_REG_VENDOR_ID1)?;

        log::info!("vendor id {:04x}", u16::from_le_bytes([lo, hi]));
        Ok(())
    }

    /// Firmware version from the EEPROM image, valid once loaded
    pub fn firmware_version(&mut self) -> Result<u16, Error<I2C::Error>> {
        let hi = self.read_register(ANX7688_REG_FW_VERSION1)?;
        let lo = self.read_register(ANX7688_REG_FW_VERSION0)?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    /// Cable detect edge; evaluation is debounced and a new edge replaces
    /// the pending one.
    pub fn cable_irq(&mut self, now_ms: u64) {
        log::debug!("cable detect edge");
        self.work.schedule(now_ms + ANX7688_CABLE_DEBOUNCE_MS);
    }

    /// The VBUS input supply reported a change (BC1.2 result)
    pub fn vbus_in_changed(&mut self, now_ms: u64) {
        self.psy_change = true;
        self.work.schedule(now_ms);
    }

    /// Force a disconnect and re-evaluation, e.g. after flashing firmware
    pub fn hw_reset(&mut self, now_ms: u64) {
        if self.state == ConnectionState::Connected {
            self.disconnect();
        }
        self.work.schedule(now_ms + ANX7688_RECONNECT_DELAY_MS);
    }

    /// Chip interrupt: acknowledge alerts, drain the soft interrupt sources
    /// and refresh the mirrored state.
    pub fn status_irq(&mut self) -> Result<(), Error<I2C::Error>> {
        if self.state != ConnectionState::Connected {
            log::warn!("spurious status interrupt");
            return Ok(());
        }

        let alert = self.tcpc_read_register(ANX7688_TCPC_REG_ALERT0)?;
        if alert != 0 {
            log::debug!("alert: {:02x}", alert);
            self.tcpc_write_register(ANX7688_TCPC_REG_ALERT0, alert)?;
        }

        let ext = self.read_register(ANX7688_REG_IRQ_EXT_SOURCE2)?;
        if ext & ANX7688_IRQ2_SOFT_INT != 0 {
            let soft = self.read_register(ANX7688_REG_STATUS_INT)?;
            self.write_register(ANX7688_REG_STATUS_INT, 0)?;
            log::debug!("soft interrupt: {:02x}", soft);

            if soft & ANX7688_SOFT_INT_RECEIVED_MSG != 0 {
                self.receive_msg()?;
            }

            let status_change = ANX7688_SOFT_INT_VCONN_CHANGE
                | ANX7688_SOFT_INT_VBUS_CHANGE
                | ANX7688_SOFT_INT_CC_STATUS_CHANGE
                | ANX7688_SOFT_INT_DATA_ROLE_CHANGE;
            if soft & status_change != 0 {
                self.update_status()?;
            }

            self.write_register(ANX7688_REG_IRQ_EXT_SOURCE2, ANX7688_IRQ2_SOFT_INT)?;
        }

        Ok(())
    }

    /// Run deferred work: the debounced cable evaluation, pending charger
    /// change and the periodic safety-net status poll.
    pub fn tick(&mut self, now_ms: u64) {
        let mut due = self.work.fire(now_ms);

        if now_ms >= self.next_poll_at {
            self.next_poll_at = now_ms + ANX7688_POLL_INTERVAL_MS;
            due = true;
        }

        if !due {
            return;
        }

        // a failed firmware load makes the chip useless until reflashed
        if self.fw_failed {
            return;
        }

        if self.psy_change {
            self.psy_change = false;
            self.handle_vbus_in_change();
        }

        self.handle_cable_change();

        if self.state == ConnectionState::Connected {
            if let Err(e) = self.update_status() {
                log::warn!("status update failed: {:?}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::cell::RefCell;
    use std::rc::Rc;
    use std::vec::Vec as StdVec;

    use embedded_hal::i2c::Operation;
    use embedded_hal_mock::eh1::delay::NoopDelay;

    use super::*;
    use crate::error::ConfigError;

    // ----------------------------------------
    // Register-map chip fake
    // ----------------------------------------

    #[derive(Debug, PartialEq, Eq)]
    struct ChipError;
    impl embedded_hal::i2c::Error for ChipError {
        fn kind(&self) -> embedded_hal::i2c::ErrorKind {
            embedded_hal::i2c::ErrorKind::Other
        }
    }

    struct ChipState {
        main: [u8; 256],
        tcpc: [u8; 256],
        eeprom: StdVec<u8>,
        /// cmd bytes of every OCM message the driver sent
        ocm_sent: StdVec<u8>,
        /// keep the send window non-zero after a write, simulating a dead OCM
        hold_send_window: bool,
        fail_all: bool,
    }

    impl ChipState {
        fn new() -> Self {
            let mut main = [0u8; 256];
            // firmware loads instantly, EEPROM controller ready, and the
            // running OCM reports VCONN on (the driver enabled it)
            main[ANX7688_REG_EEPROM_LOAD_STATUS0 as usize] = ANX7688_EEPROM_FW_LOADED;
            main[ANX7688_REG_EEPROM_ACCESS_STATUS as usize] = ANX7688_EEPROM_ACCESS_READY;
            main[ANX7688_REG_STATUS as usize] = ANX7688_STATUS_VCONN_ON;
            main[ANX7688_REG_FW_VERSION1 as usize] = 0x01;
            main[ANX7688_REG_FW_VERSION0 as usize] = 0x15;

            ChipState {
                main,
                tcpc: [0u8; 256],
                eeprom: std::vec![0xff; 0x10000],
                ocm_sent: StdVec::new(),
                hold_send_window: false,
                fail_all: false,
            }
        }

        fn eeprom_addr(&self) -> usize {
            ((self.main[ANX7688_REG_EEPROM_ADDR_HIGH as usize] as usize) << 8)
                | self.main[ANX7688_REG_EEPROM_ADDR_LOW as usize] as usize
        }

        fn write(&mut self, dev: u8, reg: usize, data: &[u8]) {
            if dev == ANX7688_TCPC_I2C_ADDRESS
                && reg == ANX7688_TCPC_REG_INTERFACE_SEND as usize
                && data.len() > 1
                && !self.hold_send_window
            {
                // responsive OCM: consume the frame immediately
                self.ocm_sent.push(data[1]);
                return;
            }

            if dev == ANX7688_I2C_ADDRESS {
                self.main[reg..reg + data.len()].copy_from_slice(data);
                if reg == ANX7688_REG_EEPROM_CTRL as usize {
                    self.eeprom_op(data[0]);
                }
            } else {
                self.tcpc[reg..reg + data.len()].copy_from_slice(data);
            }
        }

        fn eeprom_op(&mut self, cmd: u8) {
            let addr = self.eeprom_addr();
            let win = ANX7688_REG_EEPROM_DATA0 as usize;
            match cmd {
                ANX7688_EEPROM_CTRL_READ => {
                    let block: [u8; 16] = self.eeprom[addr..addr + 16].try_into().unwrap();
                    self.main[win..win + 16].copy_from_slice(&block);
                }
                ANX7688_EEPROM_CTRL_WRITE => {
                    let block: [u8; 16] = self.main[win..win + 16].try_into().unwrap();
                    self.eeprom[addr..addr + 16].copy_from_slice(&block);
                }
                _ => {}
            }
            self.main[ANX7688_REG_EEPROM_CTRL as usize] |= ANX7688_EEPROM_CTRL_DONE;
        }

        fn read(&self, dev: u8, reg: usize, buf: &mut [u8]) {
            let bank = if dev == ANX7688_I2C_ADDRESS {
                &self.main
            } else {
                &self.tcpc
            };
            buf.copy_from_slice(&bank[reg..reg + buf.len()]);
        }
    }

    #[derive(Clone)]
    struct FakeChip(Rc<RefCell<ChipState>>);

    impl embedded_hal::i2c::ErrorType for FakeChip {
        type Error = ChipError;
    }

    impl I2c for FakeChip {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), ChipError> {
            let mut st = self.0.borrow_mut();
            if st.fail_all {
                return Err(ChipError);
            }

            let mut ptr = 0usize;
            for op in operations {
                match op {
                    Operation::Write(bytes) => {
                        ptr = bytes[0] as usize;
                        if bytes.len() > 1 {
                            st.write(address, ptr, &bytes[1..]);
                        }
                    }
                    Operation::Read(buf) => st.read(address, ptr, buf),
                }
            }
            Ok(())
        }
    }

    // ----------------------------------------
    // Collaborator fakes
    // ----------------------------------------

    #[derive(Default)]
    struct RailState {
        enabled: bool,
        enables: usize,
        disables: usize,
        fail_next_enable: bool,
    }

    #[derive(Clone, Default)]
    struct FakeRail(Rc<RefCell<RailState>>);

    impl Regulator for FakeRail {
        type Error = ();
        fn enable(&mut self) -> Result<(), ()> {
            let mut st = self.0.borrow_mut();
            if st.fail_next_enable {
                st.fail_next_enable = false;
                return Err(());
            }
            st.enabled = true;
            st.enables += 1;
            Ok(())
        }
        fn disable(&mut self) -> Result<(), ()> {
            let mut st = self.0.borrow_mut();
            st.enabled = false;
            st.disables += 1;
            Ok(())
        }
        fn is_enabled(&mut self) -> Result<bool, ()> {
            Ok(self.0.borrow().enabled)
        }
    }

    #[derive(Debug)]
    struct PinError;
    impl embedded_hal::digital::Error for PinError {
        fn kind(&self) -> embedded_hal::digital::ErrorKind {
            embedded_hal::digital::ErrorKind::Other
        }
    }

    #[derive(Clone, Default)]
    struct FakePin(Rc<RefCell<bool>>);

    impl embedded_hal::digital::ErrorType for FakePin {
        type Error = PinError;
    }
    impl OutputPin for FakePin {
        fn set_low(&mut self) -> Result<(), PinError> {
            *self.0.borrow_mut() = false;
            Ok(())
        }
        fn set_high(&mut self) -> Result<(), PinError> {
            *self.0.borrow_mut() = true;
            Ok(())
        }
    }
    impl InputPin for FakePin {
        fn is_high(&mut self) -> Result<bool, PinError> {
            Ok(*self.0.borrow())
        }
        fn is_low(&mut self) -> Result<bool, PinError> {
            Ok(!*self.0.borrow())
        }
    }

    struct PortState {
        opmode: Option<PowerOpMode>,
        pwr_role: Option<PowerRole>,
        vconn_role: Option<PowerRole>,
        data_role: Option<DataRole>,
        usb_role: UsbRole,
        partner_registered: bool,
        registers: usize,
        unregisters: usize,
    }

    impl Default for PortState {
        fn default() -> Self {
            PortState {
                opmode: None,
                pwr_role: None,
                vconn_role: None,
                data_role: None,
                usb_role: UsbRole::None,
                partner_registered: false,
                registers: 0,
                unregisters: 0,
            }
        }
    }

    #[derive(Clone, Default)]
    struct FakePort(Rc<RefCell<PortState>>);

    impl TypecPort for FakePort {
        type Error = ();
        fn set_pwr_opmode(&mut self, mode: PowerOpMode) {
            self.0.borrow_mut().opmode = Some(mode);
        }
        fn set_pwr_role(&mut self, role: PowerRole) {
            self.0.borrow_mut().pwr_role = Some(role);
        }
        fn set_vconn_role(&mut self, role: PowerRole) {
            self.0.borrow_mut().vconn_role = Some(role);
        }
        fn set_data_role(&mut self, role: DataRole) {
            self.0.borrow_mut().data_role = Some(role);
        }
        fn usb_role(&self) -> UsbRole {
            self.0.borrow().usb_role
        }
        fn set_usb_role(&mut self, role: UsbRole) -> Result<(), ()> {
            self.0.borrow_mut().usb_role = role;
            Ok(())
        }
        fn register_partner(&mut self) -> Result<(), ()> {
            let mut st = self.0.borrow_mut();
            st.partner_registered = true;
            st.registers += 1;
            Ok(())
        }
        fn unregister_partner(&mut self) {
            let mut st = self.0.borrow_mut();
            st.partner_registered = false;
            st.unregisters += 1;
        }
    }

    struct PsyState {
        limit_ua: Option<u32>,
        online: Option<bool>,
        bc_enabled: bool,
        usb_type: UsbBcType,
        bc_disables: usize,
    }

    impl Default for PsyState {
        fn default() -> Self {
            PsyState {
                limit_ua: None,
                online: None,
                bc_enabled: true,
                usb_type: UsbBcType::Unknown,
                bc_disables: 0,
            }
        }
    }

    #[derive(Clone, Default)]
    struct FakePsy(Rc<RefCell<PsyState>>);

    impl VbusInSupply for FakePsy {
        type Error = ();
        fn set_current_limit_ua(&mut self, ua: u32) -> Result<(), ()> {
            self.0.borrow_mut().limit_ua = Some(ua);
            Ok(())
        }
        fn set_online(&mut self, online: bool) -> Result<(), ()> {
            self.0.borrow_mut().online = Some(online);
            Ok(())
        }
        fn set_bc_enabled(&mut self, enabled: bool) -> Result<(), ()> {
            let mut st = self.0.borrow_mut();
            if !enabled {
                st.bc_disables += 1;
            }
            st.bc_enabled = enabled;
            Ok(())
        }
        fn bc_enabled(&mut self) -> Result<bool, ()> {
            Ok(self.0.borrow().bc_enabled)
        }
        fn usb_type(&mut self) -> Result<UsbBcType, ()> {
            Ok(self.0.borrow().usb_type)
        }
    }

    // ----------------------------------------
    // Harness
    // ----------------------------------------

    type TestBridge =
        Anx7688<FakeChip, NoopDelay, FakePin, FakePin, FakePin, FakePort, FakePsy, FakeRail>;

    struct Harness {
        chip: Rc<RefCell<ChipState>>,
        port: Rc<RefCell<PortState>>,
        psy: Rc<RefCell<PsyState>>,
        vconn: Rc<RefCell<RailState>>,
        vbus: Rc<RefCell<RailState>>,
        cable: Rc<RefCell<bool>>,
        enable_pin: Rc<RefCell<bool>>,
        bridge: TestBridge,
    }

    fn harness() -> Harness {
        let chip = Rc::new(RefCell::new(ChipState::new()));
        let port = FakePort::default();
        let psy = FakePsy::default();
        let vconn = FakeRail::default();
        let vbus = FakeRail::default();
        let cable = FakePin::default();
        let enable_pin = FakePin::default();

        let bridge = Anx7688::new(
            FakeChip(chip.clone()),
            NoopDelay::new(),
            core::array::from_fn(|_| FakeRail::default()),
            vconn.clone(),
            vbus.clone(),
            FakePin::default(),
            enable_pin.clone(),
            cable.clone(),
            port.clone(),
            psy.clone(),
        );

        Harness {
            chip,
            port: port.0,
            psy: psy.0,
            vconn: vconn.0,
            vbus: vbus.0,
            cable: cable.0,
            enable_pin: enable_pin.0,
            bridge,
        }
    }

    fn connected_harness() -> Harness {
        let mut h = harness();
        h.bridge.probe(0).unwrap();
        *h.cable.borrow_mut() = true;
        h.bridge.cable_irq(0);
        h.bridge.tick(ANX7688_CABLE_DEBOUNCE_MS);
        assert_eq!(h.bridge.state(), ConnectionState::Connected);
        h
    }

    // ----------------------------------------
    // Tests
    // ----------------------------------------

    #[test]
    fn debounce_reschedules_and_fires_once() {
        let mut d = Debounce::default();
        d.schedule(10);
        d.schedule(15); // a new edge replaces the pending deadline

        assert!(!d.fire(12));
        assert!(d.fire(15));
        assert!(!d.fire(16));
    }

    #[test]
    fn cable_edge_connects_after_debounce() {
        let mut h = harness();
        *h.cable.borrow_mut() = true;

        h.bridge.cable_irq(100);
        h.bridge.tick(105);
        assert_eq!(h.bridge.state(), ConnectionState::Disconnected);

        h.bridge.tick(110);
        assert_eq!(h.bridge.state(), ConnectionState::Connected);
        assert!(h.bridge.is_powered());
        assert!(h.vconn.borrow().enabled);
        assert!(h.port.borrow().partner_registered);

        // boot-time OCM configuration, in order
        assert_eq!(
            h.chip.borrow().ocm_sent,
            std::vec![
                OCM_MSG_PWR_SRC_CAP,
                OCM_MSG_PWR_SNK_CAP,
                OCM_MSG_DP_SNK_IDENTITY,
                OCM_MSG_SVID
            ]
        );

        // sink policy timing, in register units
        let chip = h.chip.borrow();
        assert_eq!(chip.main[ANX7688_REG_VBUS_OFF_DELAY_TIME as usize], 25);
        assert_eq!(chip.main[ANX7688_REG_TRY_UFP_TIMER as usize], 150);
        assert_eq!(chip.main[ANX7688_REG_MAX_VOLTAGE as usize], 50);
    }

    #[test]
    fn safety_poll_catches_missed_insertion_edge() {
        let mut h = harness();
        h.bridge.probe(0).unwrap();

        // initial evaluation finds no cable
        h.bridge.tick(ANX7688_CABLE_DEBOUNCE_MS);
        assert_eq!(h.bridge.state(), ConnectionState::Disconnected);

        // the cable appears but its edge interrupt is lost
        *h.cable.borrow_mut() = true;
        h.bridge.tick(ANX7688_POLL_INTERVAL_MS);
        assert_eq!(h.bridge.state(), ConnectionState::Connected);
    }

    #[test]
    fn transient_rail_failure_is_retried_on_the_next_poll() {
        let mut h = connected_harness();

        h.chip.borrow_mut().main[ANX7688_REG_STATUS as usize] =
            ANX7688_STATUS_VCONN_ON | ANX7688_STATUS_VBUS_ON;
        h.vbus.borrow_mut().fail_next_enable = true;

        h.bridge.tick(ANX7688_POLL_INTERVAL_MS);
        assert!(!h.vbus.borrow().enabled);
        assert_ne!(h.port.borrow().pwr_role, Some(PowerRole::Source));

        // the status byte has not moved, the mirror still converges
        h.bridge.tick(2 * ANX7688_POLL_INTERVAL_MS);
        assert!(h.vbus.borrow().enabled);
        assert_eq!(h.port.borrow().pwr_role, Some(PowerRole::Source));
    }

    #[test]
    fn bouncing_edges_connect_only_once() {
        let mut h = harness();
        *h.cable.borrow_mut() = true;

        h.bridge.cable_irq(0);
        h.bridge.cable_irq(4);
        h.bridge.cable_irq(8);

        h.bridge.tick(12); // first deadline replaced, nothing due yet
        assert_eq!(h.bridge.state(), ConnectionState::Disconnected);

        h.bridge.tick(18);
        assert_eq!(h.bridge.state(), ConnectionState::Connected);
        assert_eq!(h.port.borrow().registers, 1);
    }

    #[test]
    fn firmware_load_timeout_rolls_back_and_latches() {
        let mut h = harness();
        h.chip.borrow_mut().main[ANX7688_REG_EEPROM_LOAD_STATUS0 as usize] = 0;
        *h.cable.borrow_mut() = true;

        h.bridge.cable_irq(0);
        h.bridge.tick(10);

        assert_eq!(h.bridge.state(), ConnectionState::Disconnected);
        assert!(h.bridge.fw_failed());
        assert!(!h.bridge.is_powered());
        assert!(!*h.enable_pin.borrow());
        assert!(!h.vconn.borrow().enabled);

        // further edges are ignored until new firmware is flashed
        h.bridge.cable_irq(20);
        h.bridge.tick(30);
        assert_eq!(h.bridge.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn cable_removal_resets_port_and_charger() {
        let mut h = connected_harness();

        *h.cable.borrow_mut() = false;
        h.bridge.cable_irq(500);
        h.bridge.tick(510);

        assert_eq!(h.bridge.state(), ConnectionState::Disconnected);
        assert!(!h.bridge.is_powered());
        assert!(!h.vconn.borrow().enabled);

        let port = h.port.borrow();
        assert!(!port.partner_registered);
        assert_eq!(port.opmode, Some(PowerOpMode::Usb));
        assert_eq!(port.pwr_role, Some(PowerRole::Sink));
        assert_eq!(port.data_role, Some(DataRole::Device));
        assert_eq!(port.usb_role, UsbRole::None);

        let psy = h.psy.borrow();
        assert_eq!(psy.limit_ua, Some(ANX7688_DEFAULT_CURRENT_LIMIT_UA));
        assert_eq!(psy.online, Some(false));
        assert!(psy.bc_enabled);
    }

    #[test]
    fn safety_poll_catches_missed_status_change() {
        let mut h = connected_harness();

        h.chip.borrow_mut().main[ANX7688_REG_STATUS as usize] =
            ANX7688_STATUS_VCONN_ON | ANX7688_STATUS_VBUS_ON;

        // not due yet
        h.bridge.tick(500);
        assert_eq!(h.vbus.borrow().enables, 0);

        h.bridge.tick(ANX7688_POLL_INTERVAL_MS);
        assert!(h.vbus.borrow().enabled);
        assert_eq!(h.vbus.borrow().enables, 1);
        assert_eq!(h.port.borrow().pwr_role, Some(PowerRole::Source));

        // unchanged status on the next poll updates nothing
        h.bridge.tick(2 * ANX7688_POLL_INTERVAL_MS);
        assert_eq!(h.vbus.borrow().enables, 1);
    }

    #[test]
    fn status_irq_dispatches_received_message() {
        let mut h = connected_harness();

        let mut frame = [0u8; OCM_FRAME_SIZE];
        ocm::encode_frame(OCM_MSG_ACCEPT, &[0x00], &mut frame).unwrap();
        {
            let mut chip = h.chip.borrow_mut();
            let recv = ANX7688_TCPC_REG_INTERFACE_RECV as usize;
            chip.tcpc[recv..recv + OCM_FRAME_SIZE].copy_from_slice(&frame);
            chip.main[ANX7688_REG_IRQ_EXT_SOURCE2 as usize] = ANX7688_IRQ2_SOFT_INT;
            chip.main[ANX7688_REG_STATUS_INT as usize] = ANX7688_SOFT_INT_RECEIVED_MSG;
        }

        h.bridge.status_irq().unwrap();

        let chip = h.chip.borrow();
        // receive window released, soft interrupt acknowledged
        assert_eq!(chip.tcpc[ANX7688_TCPC_REG_INTERFACE_RECV as usize], 0);
        assert_eq!(chip.main[ANX7688_REG_STATUS_INT as usize], 0);
    }

    #[test]
    fn corrupt_received_message_is_a_protocol_error() {
        let mut h = connected_harness();

        {
            let mut chip = h.chip.borrow_mut();
            let recv = ANX7688_TCPC_REG_INTERFACE_RECV as usize;
            chip.tcpc[recv] = 3;
            chip.tcpc[recv + 1] = OCM_MSG_ACCEPT;
            // bogus checksum
            chip.tcpc[recv + 4] = 0x5a;
            chip.main[ANX7688_REG_IRQ_EXT_SOURCE2 as usize] = ANX7688_IRQ2_SOFT_INT;
            chip.main[ANX7688_REG_STATUS_INT as usize] = ANX7688_SOFT_INT_RECEIVED_MSG;
        }

        assert_eq!(
            h.bridge.status_irq(),
            Err(Error::Protocol(ProtocolError::CorruptFrame))
        );
        // the window was still released
        assert_eq!(
            h.chip.borrow().tcpc[ANX7688_TCPC_REG_INTERFACE_RECV as usize],
            0
        );
    }

    #[test]
    fn cc_advertisement_overrides_bc_detection() {
        let mut h = connected_harness();

        {
            let mut chip = h.chip.borrow_mut();
            chip.main[ANX7688_REG_CC_STATUS as usize] = 0x0c; // 3 A on CC1
            chip.main[ANX7688_REG_IRQ_EXT_SOURCE2 as usize] = ANX7688_IRQ2_SOFT_INT;
            chip.main[ANX7688_REG_STATUS_INT as usize] = ANX7688_SOFT_INT_CC_STATUS_CHANGE;
        }
        h.bridge.status_irq().unwrap();

        let psy = h.psy.borrow();
        assert_eq!(psy.limit_ua, Some(3_000_000));
        assert!(!psy.bc_enabled);
        assert_eq!(psy.online, Some(true));
        drop(psy);
        assert_eq!(h.port.borrow().opmode, Some(PowerOpMode::Current3_0A));
    }

    #[test]
    fn cc1_takes_priority_over_cc2() {
        let mut h = connected_harness();

        {
            let mut chip = h.chip.borrow_mut();
            chip.main[ANX7688_REG_CC_STATUS as usize] = 0x48; // 1.5 A on CC1, default on CC2
            chip.main[ANX7688_REG_IRQ_EXT_SOURCE2 as usize] = ANX7688_IRQ2_SOFT_INT;
            chip.main[ANX7688_REG_STATUS_INT as usize] = ANX7688_SOFT_INT_CC_STATUS_CHANGE;
        }
        h.bridge.status_irq().unwrap();

        assert_eq!(h.psy.borrow().limit_ua, Some(1_500_000));
        assert_eq!(h.port.borrow().opmode, Some(PowerOpMode::Current1_5A));
    }

    #[test]
    fn bc_detection_sets_limit_at_default_current() {
        let mut h = connected_harness();
        h.psy.borrow_mut().usb_type = UsbBcType::Dcp;

        h.bridge.vbus_in_changed(200);
        h.bridge.tick(200);

        assert_eq!(h.psy.borrow().limit_ua, Some(2_000_000));

        // same result again is not reapplied
        h.psy.borrow_mut().limit_ua = None;
        h.bridge.vbus_in_changed(300);
        h.bridge.tick(300);
        assert_eq!(h.psy.borrow().limit_ua, None);
    }

    #[test]
    fn spurious_status_irq_is_ignored() {
        let mut h = harness();
        assert_eq!(h.bridge.status_irq(), Ok(()));
        assert_eq!(h.chip.borrow().ocm_sent.len(), 0);
    }

    #[test]
    fn busy_send_window_is_reported() {
        let mut h = connected_harness();
        h.chip.borrow_mut().tcpc[ANX7688_TCPC_REG_INTERFACE_SEND as usize] = 0x05;

        assert_eq!(
            h.bridge.send_ocm_message(OCM_MSG_ACCEPT, &[0x00]),
            Err(Error::Timeout(TimeoutError::SendWindow))
        );
    }

    #[test]
    fn undrained_send_window_times_out() {
        let mut h = connected_harness();
        h.chip.borrow_mut().hold_send_window = true;

        assert_eq!(
            h.bridge.send_ocm_message(OCM_MSG_ACCEPT, &[0x00]),
            Err(Error::Timeout(TimeoutError::SendWindow))
        );
    }

    #[test]
    fn probe_sets_safe_defaults_and_schedules_evaluation() {
        let mut h = harness();
        h.bridge.probe(0).unwrap();

        assert!(!h.bridge.is_powered());
        assert_eq!(h.port.borrow().opmode, Some(PowerOpMode::Usb));
        assert_eq!(h.psy.borrow().limit_ua, Some(ANX7688_DEFAULT_CURRENT_LIMIT_UA));

        // initial evaluation picks up an already-inserted cable
        *h.cable.borrow_mut() = true;
        h.bridge.tick(ANX7688_CABLE_DEBOUNCE_MS);
        assert_eq!(h.bridge.state(), ConnectionState::Connected);
    }

    #[test]
    fn flash_firmware_writes_padded_blocks_and_clears_latch() {
        let mut h = harness();
        h.chip.borrow_mut().main[ANX7688_REG_EEPROM_LOAD_STATUS0 as usize] = 0;
        *h.cable.borrow_mut() = true;
        h.bridge.cable_irq(0);
        h.bridge.tick(10);
        assert!(h.bridge.fw_failed());

        let image: StdVec<u8> = (0u8..20).collect();
        h.bridge.flash_firmware(&image, 100).unwrap();

        assert!(!h.bridge.fw_failed());
        assert!(!h.bridge.is_powered());

        let chip = h.chip.borrow();
        let base = ANX7688_EEPROM_FW_OFFSET as usize;
        assert_eq!(&chip.eeprom[base..base + 20], &image[..]);
        // tail of the last block is zero-padded
        assert_eq!(&chip.eeprom[base + 20..base + 32], &[0u8; 12]);
    }

    #[test]
    fn flash_firmware_rejects_oversized_image() {
        let mut h = harness();
        let image = std::vec![0u8; ANX7688_EEPROM_FW_CAPACITY + 1];

        assert_eq!(
            h.bridge.flash_firmware(&image, 0),
            Err(Error::Config(ConfigError::ImageTooLarge))
        );
    }

    #[test]
    fn dump_firmware_reads_back_the_image() {
        let mut h = harness();
        {
            let mut chip = h.chip.borrow_mut();
            let base = ANX7688_EEPROM_FW_OFFSET as usize;
            for i in 0..32 {
                chip.eeprom[base + i] = i as u8;
            }
        }

        let mut out = [0u8; 32];
        h.bridge.dump_firmware(&mut out, 0).unwrap();

        for (i, b) in out.iter().enumerate() {
            assert_eq!(*b, i as u8);
        }
        assert!(!h.bridge.is_powered());
    }

    #[test]
    fn dump_firmware_rejects_unaligned_buffers() {
        let mut h = harness();
        let mut out = [0u8; 17];

        assert_eq!(
            h.bridge.dump_firmware(&mut out, 0),
            Err(Error::Config(ConfigError::InvalidParameter))
        );
    }

    #[test]
    fn hw_reset_disconnects_and_reevaluates() {
        let mut h = connected_harness();
        *h.cable.borrow_mut() = true;

        h.bridge.hw_reset(1000);
        assert_eq!(h.bridge.state(), ConnectionState::Disconnected);

        h.bridge.tick(1000 + ANX7688_RECONNECT_DELAY_MS);
        assert_eq!(h.bridge.state(), ConnectionState::Connected);
        assert_eq!(h.port.borrow().registers, 2);
    }
}
