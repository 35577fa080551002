//! Modem power sequencer
//!
//! Power-up and power-down sequencing for the cellular modems found on
//! PinePhone boards. The sequences are slow (seconds to tens of seconds),
//! gated on modem-side status lines and, for the Quectel EG25, followed by
//! an AT-command configuration pass over the modem's UART.
//!
//! The board's pins, power rail and AT channel live behind [`ModemIo`];
//! everything modem-model-specific lives behind [`ModemVariant`], with
//! [`AnyVariant`] as the concrete sum of the supported models so a host can
//! pick one at runtime from board configuration.

mod eg25;
mod mg2723;

pub use eg25::Eg25;
pub use mg2723::Mg2723;

use core::fmt::Debug;

use crate::error::{ConfigError, Error, ProtocolError, TimeoutError};

/// Pause after a hard `ERROR` before retrying an AT command, in ms
const AT_RETRY_PAUSE_MS: u32 = 1000;

/// Runtime kill-switch detection: wakeup line low for this long while
/// powered means the user cut the modem's RF power, in ms
const KILLSWITCH_QUIET_MS: u64 = 5000;

/// Output lines the sequencer drives
///
/// Boards do not wire all of them; driving or releasing an absent line is a
/// no-op in the [`ModemIo`] implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLine {
    /// RF enable (`W_DISABLE#`), 1 = RF on
    Enable,
    /// Reset pulse input, active high
    Reset,
    /// Power key; short pulse powers up, long pulse powers down
    PowerKey,
    /// Sleep request, must be low during power-on
    Sleep,
    /// DTR; high allows the modem to sleep, a falling edge wakes it
    Dtr,
    /// AP_READY; host is ready to receive unsolicited messages
    HostReady,
}

/// Input lines the sequencer samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputLine {
    /// Power status, 0 = powered, 1 = unpowered
    Status,
    /// Ring indicator / wakeup output from the modem
    Wakeup,
}

/// Final result of one AT command exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtResult {
    /// Terminated with `OK`
    Ok,
    /// Terminated with `ERROR`
    Error,
    /// No terminator within the allowed time
    Timeout,
}

/// Classification of an unsolicited modem message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemEvent {
    /// Modem finished booting
    Ready,
    /// Modem confirmed an orderly shutdown
    PoweredDown,
    /// Anything else, to be forwarded to the host's modem stack
    Urc,
}

/// Board-side plumbing for one modem slot
///
/// Pin methods are infallible: GPIO writes do not fail on this platform and
/// absent optional lines are skipped by the implementation. `release`
/// returns a line to a floating input so an unpowered modem is not
/// back-fed through its control pins.
pub trait ModemIo {
    type Error: Debug;

    fn drive(&mut self, line: OutputLine, level: bool);
    fn release(&mut self, line: OutputLine);

    /// Sample an input line; `None` when the board does not wire it
    fn sense(&mut self, line: InputLine) -> Option<bool>;

    fn enable_power(&mut self) -> Result<(), Self::Error>;
    fn disable_power(&mut self);
    fn power_is_enabled(&mut self) -> bool;

    /// Send an AT command and wait for its `OK`/`ERROR` terminator
    fn at_cmd(&mut self, cmd: &str, timeout_ms: u32) -> AtResult;

    /// Response lines of the last AT command, newline separated
    fn response(&self) -> &str;

    fn delay_ms(&mut self, ms: u32);
}

/// Static configuration of one modem slot
#[derive(Debug, Clone, Copy, Default)]
pub struct ModemConfig {
    /// The power key shares a pin with the status line; it must be released
    /// to an input right after each pulse
    pub status_pwrkey_multiplexed: bool,
    /// Skip the AT configuration pass after power-up
    pub dumb_powerup: bool,
    /// Required digital audio interface setting (`AT+QDAI`), checked and
    /// corrected on every power-up
    pub qdai: Option<&'static str>,
}

/// One modem model's power and configuration sequences
pub trait ModemVariant<IO: ModemIo> {
    /// Put the control pins in a safe state at boot
    fn power_init(&self, io: &mut IO, config: &ModemConfig) -> Result<(), Error<IO::Error>> {
        let _ = (io, config);
        Ok(())
    }

    fn power_up(&self, io: &mut IO, config: &ModemConfig) -> Result<(), Error<IO::Error>>;
    fn power_down(&self, io: &mut IO, config: &ModemConfig) -> Result<(), Error<IO::Error>>;

    fn reset(&self, io: &mut IO) -> Result<(), Error<IO::Error>> {
        let _ = io;
        log::error!("reset requested but not implemented");
        Err(Error::Config(ConfigError::Unsupported))
    }

    fn classify_msg(&self, msg: &str) -> ModemEvent {
        let _ = msg;
        ModemEvent::Urc
    }

    fn suspend(&self, io: &mut IO) -> Result<(), Error<IO::Error>> {
        let _ = io;
        Ok(())
    }

    fn resume(&self, io: &mut IO) -> Result<(), Error<IO::Error>> {
        let _ = io;
        Ok(())
    }

    /// Whether the wakeup line should be monitored for a runtime kill switch
    fn monitors_wakeup(&self) -> bool {
        false
    }
}

/// Supported modem models
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemVariantKind {
    Eg25,
    Mg2723,
}

/// Sum of the supported variants, for hosts that pick one at runtime
pub enum AnyVariant {
    Eg25(Eg25),
    Mg2723(Mg2723),
}

impl AnyVariant {
    pub fn new(kind: ModemVariantKind) -> Self {
        match kind {
            ModemVariantKind::Eg25 => AnyVariant::Eg25(Eg25),
            ModemVariantKind::Mg2723 => AnyVariant::Mg2723(Mg2723),
        }
    }
}

impl<IO: ModemIo> ModemVariant<IO> for AnyVariant {
    fn power_init(&self, io: &mut IO, config: &ModemConfig) -> Result<(), Error<IO::Error>> {
        match self {
            AnyVariant::Eg25(v) => v.power_init(io, config),
            AnyVariant::Mg2723(v) => v.power_init(io, config),
        }
    }

    fn power_up(&self, io: &mut IO, config: &ModemConfig) -> Result<(), Error<IO::Error>> {
        match self {
            AnyVariant::Eg25(v) => v.power_up(io, config),
            AnyVariant::Mg2723(v) => v.power_up(io, config),
        }
    }

    fn power_down(&self, io: &mut IO, config: &ModemConfig) -> Result<(), Error<IO::Error>> {
        match self {
            AnyVariant::Eg25(v) => v.power_down(io, config),
            AnyVariant::Mg2723(v) => v.power_down(io, config),
        }
    }

    fn reset(&self, io: &mut IO) -> Result<(), Error<IO::Error>> {
        match self {
            AnyVariant::Eg25(v) => ModemVariant::<IO>::reset(v, io),
            AnyVariant::Mg2723(v) => v.reset(io),
        }
    }

    fn classify_msg(&self, msg: &str) -> ModemEvent {
        match self {
            AnyVariant::Eg25(v) => ModemVariant::<IO>::classify_msg(v, msg),
            AnyVariant::Mg2723(v) => ModemVariant::<IO>::classify_msg(v, msg),
        }
    }

    fn suspend(&self, io: &mut IO) -> Result<(), Error<IO::Error>> {
        match self {
            AnyVariant::Eg25(v) => v.suspend(io),
            AnyVariant::Mg2723(v) => v.suspend(io),
        }
    }

    fn resume(&self, io: &mut IO) -> Result<(), Error<IO::Error>> {
        match self {
            AnyVariant::Eg25(v) => v.resume(io),
            AnyVariant::Mg2723(v) => v.resume(io),
        }
    }

    fn monitors_wakeup(&self) -> bool {
        match self {
            AnyVariant::Eg25(v) => ModemVariant::<IO>::monitors_wakeup(v),
            AnyVariant::Mg2723(v) => ModemVariant::<IO>::monitors_wakeup(v),
        }
    }
}

/// Modem power manager
///
/// Serializes the variant's sequences against the current power state and
/// tracks the kill-switch status. Like the other drivers it is clock-driven:
/// the host forwards wakeup-line edges through [`ModemPower::wakeup_irq`]
/// and calls [`ModemPower::tick`] about once a second.
pub struct ModemPower<IO, V> {
    io: IO,
    variant: V,
    config: ModemConfig,
    powered: bool,
    killswitched: bool,
    last_wakeup_ms: u64,
}

impl<IO, V> ModemPower<IO, V>
where
    IO: ModemIo,
    V: ModemVariant<IO>,
{
    pub fn new(io: IO, variant: V, config: ModemConfig) -> Self {
        Self {
            io,
            variant,
            config,
            powered: false,
            killswitched: false,
            last_wakeup_ms: 0,
        }
    }

    /// Put the control pins in a safe state; call once at boot
    pub fn power_init(&mut self) -> Result<(), Error<IO::Error>> {
        self.variant.power_init(&mut self.io, &self.config)
    }

    pub fn power_up(&mut self) -> Result<(), Error<IO::Error>> {
        if self.powered {
            return Ok(());
        }

        log::info!("powering up");
        match self.variant.power_up(&mut self.io, &self.config) {
            Ok(()) => {
                self.powered = true;
                if self.killswitched {
                    self.killswitched = false;
                    log::info!("kill switch released");
                }
                log::info!("powered up");
                Ok(())
            }
            Err(e) => {
                if matches!(e, Error::Timeout(TimeoutError::ModemWakeup)) && !self.killswitched {
                    self.killswitched = true;
                    log::warn!("the modem looks kill-switched");
                }
                log::error!("power up failed: {:?}", e);
                Err(e)
            }
        }
    }

    pub fn power_down(&mut self) -> Result<(), Error<IO::Error>> {
        if !self.powered {
            return Ok(());
        }

        log::info!("powering down");
        self.variant.power_down(&mut self.io, &self.config)?;
        self.powered = false;
        log::info!("powered down");
        Ok(())
    }

    pub fn reset(&mut self) -> Result<(), Error<IO::Error>> {
        if !self.powered {
            log::error!("reset requested but the modem is not powered");
            return Err(Error::Config(ConfigError::Unsupported));
        }

        log::info!("resetting");
        self.variant.reset(&mut self.io)
    }

    /// Classify a complete unsolicited line from the modem's UART
    pub fn receive_msg(&mut self, msg: &str) -> ModemEvent {
        log::debug!("RECV: {}", msg);
        self.variant.classify_msg(msg)
    }

    /// The wakeup line had a falling edge
    pub fn wakeup_irq(&mut self, now_ms: u64) {
        self.last_wakeup_ms = now_ms;
    }

    /// Runtime kill-switch watchdog; a quiet, low wakeup line on a powered
    /// modem means its RF power was cut behind our back.
    pub fn tick(&mut self, now_ms: u64) {
        if !self.powered || !self.variant.monitors_wakeup() || self.killswitched {
            return;
        }

        if self.io.sense(InputLine::Wakeup) == Some(false)
            && now_ms.saturating_sub(self.last_wakeup_ms) > KILLSWITCH_QUIET_MS
        {
            self.killswitched = true;
            log::warn!("modem looks kill-switched at runtime");
        }
    }

    pub fn suspend(&mut self) -> Result<(), Error<IO::Error>> {
        if !self.powered {
            return Ok(());
        }
        self.variant.suspend(&mut self.io)
    }

    pub fn resume(&mut self) -> Result<(), Error<IO::Error>> {
        if !self.powered {
            return Ok(());
        }
        self.variant.resume(&mut self.io)
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    pub fn is_killswitched(&self) -> bool {
        self.killswitched
    }
}

/// Run an AT command with retries.
///
/// A hard `ERROR` retries after a pause, giving the modem time to finish
/// whatever made it unhappy. With `ignore_timeout` a timeout also retries,
/// immediately; that is for commands fired at a modem that is still booting
/// and not answering at all.
fn at_cmd_retry<IO: ModemIo>(
    io: &mut IO,
    cmd: &str,
    timeout_ms: u32,
    tries: u32,
    ignore_timeout: bool,
) -> Result<(), Error<IO::Error>> {
    let mut ret = AtResult::Error;

    for _ in 0..tries.max(1) {
        ret = io.at_cmd(cmd, timeout_ms);
        match ret {
            AtResult::Ok => return Ok(()),
            AtResult::Timeout if !ignore_timeout => {
                log::error!("AT command '{}' timed out", cmd);
                return Err(Error::Protocol(ProtocolError::AtCommand));
            }
            AtResult::Timeout => {} // modem still booting, ask again
            AtResult::Error => io.delay_ms(AT_RETRY_PAUSE_MS),
        }
    }

    log::error!("AT command '{}' failed ({:?})", cmd, ret);
    Err(Error::Protocol(ProtocolError::AtCommand))
}

/// Value of the first response line starting with `prefix`
fn response_value<'a>(response: &'a str, prefix: &str) -> Option<&'a str> {
    response
        .lines()
        .find_map(|line| line.strip_prefix(prefix))
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::collections::HashMap;
    use std::string::{String, ToString};
    use std::vec::Vec;

    use super::*;

    #[derive(Default)]
    pub(super) struct FakeIo {
        /// (line, Some(level)) for drives, (line, None) for releases
        pub pin_log: Vec<(OutputLine, Option<bool>)>,
        pub wakeup: Option<bool>,
        pub status: Option<bool>,
        pub power_enabled: bool,
        pub slept_ms: u64,
        pub at_log: Vec<String>,
        /// scripted results by exact command; unlisted commands answer OK
        pub at_script: HashMap<String, (AtResult, String)>,
        last_response: String,
    }

    impl FakeIo {
        pub fn script(&mut self, cmd: &str, result: AtResult, response: &str) {
            self.at_script
                .insert(cmd.to_string(), (result, response.to_string()));
        }

        pub fn driven(&self, line: OutputLine) -> Option<bool> {
            self.pin_log
                .iter()
                .rev()
                .find(|(l, _)| *l == line)
                .and_then(|(_, level)| *level)
        }

        pub fn sent(&self, cmd: &str) -> bool {
            self.at_log.iter().any(|c| c == cmd)
        }
    }

    impl ModemIo for FakeIo {
        type Error = ();

        fn drive(&mut self, line: OutputLine, level: bool) {
            self.pin_log.push((line, Some(level)));
        }
        fn release(&mut self, line: OutputLine) {
            self.pin_log.push((line, None));
        }
        fn sense(&mut self, line: InputLine) -> Option<bool> {
            match line {
                InputLine::Status => self.status,
                InputLine::Wakeup => self.wakeup,
            }
        }
        fn enable_power(&mut self) -> Result<(), ()> {
            self.power_enabled = true;
            Ok(())
        }
        fn disable_power(&mut self) {
            self.power_enabled = false;
        }
        fn power_is_enabled(&mut self) -> bool {
            self.power_enabled
        }
        fn at_cmd(&mut self, cmd: &str, _timeout_ms: u32) -> AtResult {
            self.at_log.push(cmd.to_string());
            match self.at_script.get(cmd) {
                Some((result, response)) => {
                    self.last_response = response.clone();
                    *result
                }
                None => {
                    self.last_response = String::new();
                    AtResult::Ok
                }
            }
        }
        fn response(&self) -> &str {
            &self.last_response
        }
        fn delay_ms(&mut self, ms: u32) {
            self.slept_ms += ms as u64;
        }
    }

    /// A fake modem that boots instantly
    pub(super) fn booting_io() -> FakeIo {
        FakeIo {
            wakeup: Some(true),
            status: Some(false),
            ..FakeIo::default()
        }
    }

    #[test]
    fn retry_stops_on_first_ok() {
        let mut io = booting_io();
        assert_eq!(at_cmd_retry(&mut io, "AT", 1000, 5, false), Ok(()));
        assert_eq!(io.at_log.len(), 1);
    }

    #[test]
    fn retry_paces_hard_errors() {
        let mut io = booting_io();
        io.script("AT", AtResult::Error, "");

        assert_eq!(
            at_cmd_retry(&mut io, "AT", 1000, 3, false),
            Err(Error::Protocol(ProtocolError::AtCommand))
        );
        assert_eq!(io.at_log.len(), 3);
        assert_eq!(io.slept_ms, 3 * AT_RETRY_PAUSE_MS as u64);
    }

    #[test]
    fn retry_aborts_on_timeout_unless_ignored() {
        let mut io = booting_io();
        io.script("AT", AtResult::Timeout, "");

        assert_eq!(
            at_cmd_retry(&mut io, "AT", 1000, 5, false),
            Err(Error::Protocol(ProtocolError::AtCommand))
        );
        assert_eq!(io.at_log.len(), 1);

        // a booting modem gets asked again without pausing
        io.at_log.clear();
        assert!(at_cmd_retry(&mut io, "AT", 1000, 5, true).is_err());
        assert_eq!(io.at_log.len(), 5);
        assert_eq!(io.slept_ms, 0);
    }

    #[test]
    fn response_value_scans_lines() {
        let response = "+QDAI: 1,1,0,1,0,0,1,1\n+OTHER: x";
        assert_eq!(
            response_value(response, "+QDAI: "),
            Some("1,1,0,1,0,0,1,1")
        );
        assert_eq!(response_value(response, "+MISSING: "), None);
    }

    #[test]
    fn manager_guards_double_transitions() {
        let io = booting_io();
        let mut modem = ModemPower::new(io, Mg2723, ModemConfig::default());

        modem.power_up().unwrap();
        assert!(modem.is_powered());

        // a second power up is a no-op
        let log_len = modem.io.pin_log.len();
        modem.power_up().unwrap();
        assert_eq!(modem.io.pin_log.len(), log_len);

        modem.power_down().unwrap();
        assert!(!modem.is_powered());
        modem.power_down().unwrap();
    }

    #[test]
    fn reset_requires_power() {
        let io = booting_io();
        let mut modem = ModemPower::new(io, Mg2723, ModemConfig::default());

        assert_eq!(
            modem.reset(),
            Err(Error::Config(ConfigError::Unsupported))
        );

        modem.power_up().unwrap();
        modem.reset().unwrap();
    }

    #[test]
    fn variant_sum_dispatches_by_kind() {
        let io = booting_io();
        let variant = AnyVariant::new(ModemVariantKind::Mg2723);
        let mut modem = ModemPower::new(io, variant, ModemConfig::default());

        modem.power_up().unwrap();
        assert!(modem.is_powered());
        assert_eq!(modem.receive_msg("RDY"), ModemEvent::Urc);

        let io = booting_io();
        let variant = AnyVariant::new(ModemVariantKind::Eg25);
        let mut modem = ModemPower::new(io, variant, ModemConfig::default());
        assert_eq!(modem.receive_msg("RDY"), ModemEvent::Ready);
        assert_eq!(modem.receive_msg("POWERED DOWN"), ModemEvent::PoweredDown);
        assert_eq!(modem.receive_msg("+CMTI: \"ME\",1"), ModemEvent::Urc);
    }

    #[test]
    fn runtime_killswitch_needs_a_quiet_wakeup_line() {
        let io = booting_io();
        let mut modem = ModemPower::new(io, Eg25, ModemConfig::default());
        modem.power_up().unwrap();

        modem.wakeup_irq(1000);
        modem.io.wakeup = Some(false);

        modem.tick(2000);
        assert!(!modem.is_killswitched());

        modem.tick(1000 + KILLSWITCH_QUIET_MS + 1);
        assert!(modem.is_killswitched());
    }
}
