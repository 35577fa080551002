//! Quectel EG25 power sequences
//!
//! The EG25 powers up on a short power-key pulse and down on a long one,
//! and reports its state on status and ring-indicator lines. After each
//! power-up a configuration pass over AT commands restores factory
//! defaults, verifies the firmware and digital audio setup, and syncs a
//! table of `AT+QCFG` settings the host depends on (RI signaling, wake
//! levels, airplane-mode control, fast poweroff).

use core::fmt::Write;

use heapless::String;

use crate::error::{Error, ProtocolError, TimeoutError};
use crate::modem::{
    at_cmd_retry, response_value, AtResult, InputLine, ModemConfig, ModemEvent, ModemIo,
    ModemVariant, OutputLine,
};

/// Newest firmware we know about, for the outdated-firmware warning
pub const EG25_LATEST_KNOWN_FIRMWARE: &str = "EG25GGBR07A08M2G_01.002.07";

/// Power-key pulse lengths, in ms
const EG25_PWRKEY_ON_MS: u32 = 200;
const EG25_PWRKEY_OFF_MS: u32 = 800;

/// Boot wait: attempts and per-attempt sleep (10s total)
const EG25_BOOT_TRIES: u32 = 200;
const EG25_BOOT_POLL_MS: u32 = 50;

/// Shutdown wait: attempts and per-attempt sleep (30s total)
const EG25_SHUTDOWN_TRIES: u32 = 1500;
const EG25_SHUTDOWN_POLL_MS: u32 = 20;

/// A status change this soon after the power-key pulse is suspicious; the
/// modem needs extra time before its rail can be cut
const EG25_SHUTDOWN_MIN_MS: u32 = 500;

struct QcfgEntry {
    name: &'static str,
    value: &'static str,
    /// Custom acceptance check when a plain equality compare is too strict
    is_ok: Option<fn(&str) -> bool>,
}

fn airplane_control_is_ok(value: &str) -> bool {
    value.starts_with("1,")
}

const QCFG_TABLE: [QcfgEntry; 13] = [
    QcfgEntry { name: "risignaltype", value: "\"physical\"", is_ok: None },
    QcfgEntry { name: "urc/ri/ring", value: "\"pulse\",1,1000,5000,\"off\",1", is_ok: None },
    QcfgEntry { name: "urc/ri/smsincoming", value: "\"pulse\",1,1", is_ok: None },
    QcfgEntry { name: "urc/ri/other", value: "\"off\",1,1", is_ok: None },
    QcfgEntry { name: "urc/ri/pin", value: "uart_ri", is_ok: None },
    QcfgEntry { name: "urc/delay", value: "0", is_ok: None },
    QcfgEntry { name: "sleepind/level", value: "0", is_ok: None },
    QcfgEntry { name: "wakeupin/level", value: "0", is_ok: None },
    QcfgEntry { name: "ApRstLevel", value: "0", is_ok: None },
    QcfgEntry { name: "ModemRstLevel", value: "0", is_ok: None },
    QcfgEntry { name: "apready", value: "0,0,500", is_ok: None },
    QcfgEntry { name: "airplanecontrol", value: "1", is_ok: Some(airplane_control_is_ok) },
    QcfgEntry { name: "fast/poweroff", value: "1", is_ok: None },
];

/// Quectel EG25-G
pub struct Eg25;

impl<IO: ModemIo> ModemVariant<IO> for Eg25 {
    fn power_up(&self, io: &mut IO, config: &ModemConfig) -> Result<(), Error<IO::Error>> {
        if io.power_is_enabled() {
            log::warn!("power rail was left enabled");
        }
        io.enable_power().map_err(|e| {
            log::error!("failed to enable the power rail: {:?}", e);
            Error::Supply
        })?;

        io.drive(OutputLine::HostReady, true);
        io.drive(OutputLine::Enable, true);
        io.drive(OutputLine::Sleep, false);
        io.drive(OutputLine::Reset, false);
        io.drive(OutputLine::PowerKey, false);
        io.drive(OutputLine::Dtr, false);
        io.delay_ms(50);

        pulse_power_key(io, config, EG25_PWRKEY_ON_MS);

        if let Err(e) = wait_for_boot(io) {
            power_off(io);
            return Err(e);
        }

        if !config.dumb_powerup {
            if let Err(e) = self.configure(io, config) {
                power_off(io);
                return Err(e);
            }
        }

        // let the modem sleep when it has nothing to say
        io.drive(OutputLine::Dtr, true);
        Ok(())
    }

    fn power_down(&self, io: &mut IO, config: &ModemConfig) -> Result<(), Error<IO::Error>> {
        pulse_power_key(io, config, EG25_PWRKEY_OFF_MS);
        io.delay_ms(20);

        let mut down = false;
        for i in 0..EG25_SHUTDOWN_TRIES {
            // no status line wired means the ring indicator going quiet is
            // the only shutdown signal we get
            let off = match io.sense(InputLine::Status) {
                Some(status) => status,
                None => io.sense(InputLine::Wakeup) == Some(false),
            };
            if off {
                if i * EG25_SHUTDOWN_POLL_MS < EG25_SHUTDOWN_MIN_MS {
                    log::warn!("modem reported shutdown suspiciously soon");
                    io.delay_ms(2000);
                }
                down = true;
                break;
            }
            io.delay_ms(EG25_SHUTDOWN_POLL_MS);
        }

        if !down {
            log::warn!("modem did not shut down in time, forcibly cutting power");
        }

        power_off(io);
        Ok(())
    }

    fn classify_msg(&self, msg: &str) -> ModemEvent {
        if msg.starts_with("RDY") {
            ModemEvent::Ready
        } else if msg.starts_with("POWERED DOWN") {
            ModemEvent::PoweredDown
        } else {
            ModemEvent::Urc
        }
    }

    fn suspend(&self, io: &mut IO) -> Result<(), Error<IO::Error>> {
        io.drive(OutputLine::HostReady, false);

        // wake the modem so it takes the command
        io.drive(OutputLine::Dtr, false);
        io.delay_ms(5);
        if io.at_cmd("AT+QCFG=\"urc/cache\",1", 500) != AtResult::Ok {
            log::warn!("failed to enable URC caching");
        }
        io.drive(OutputLine::Dtr, true);
        Ok(())
    }

    fn resume(&self, io: &mut IO) -> Result<(), Error<IO::Error>> {
        io.drive(OutputLine::Dtr, false);
        io.delay_ms(5);
        if io.at_cmd("AT+QCFG=\"urc/cache\",0", 500) != AtResult::Ok {
            log::warn!("failed to disable URC caching");
        }
        io.drive(OutputLine::Dtr, true);

        io.drive(OutputLine::HostReady, true);
        Ok(())
    }

    fn monitors_wakeup(&self) -> bool {
        true
    }
}

impl Eg25 {
    fn configure<IO: ModemIo>(
        &self,
        io: &mut IO,
        config: &ModemConfig,
    ) -> Result<(), Error<IO::Error>> {
        // factory defaults, no echo; keep asking while the firmware boots
        at_cmd_retry(io, "AT&FE0", 1000, 30, true)?;

        self.check_firmware(io)?;
        self.configure_audio(io, config)?;
        self.sync_qcfg(io);

        if io.at_cmd("AT+QURCCFG=\"urcport\",\"all\"", 2000) != AtResult::Ok {
            // older firmware only knows the single-port variant
            at_cmd_retry(io, "AT+QURCCFG=\"urcport\",\"usbat\"", 2000, 1, false)?;
        }

        if io.at_cmd("AT+QSCLK=1", 2000) != AtResult::Ok {
            log::warn!("failed to enable modem sleep");
        }

        Ok(())
    }

    fn check_firmware<IO: ModemIo>(&self, io: &mut IO) -> Result<(), Error<IO::Error>> {
        at_cmd_retry(io, "AT+QVERSION;+QSUBSYSVER", 1000, 15, false)?;

        let mut seen = false;
        let mut outdated = false;
        for line in io.response().lines() {
            if line.contains("Project Rev") {
                seen = true;
                log::info!("firmware: {}", line);
                if !line.contains(EG25_LATEST_KNOWN_FIRMWARE) {
                    outdated = true;
                }
            }
        }

        if !seen {
            log::warn!("could not determine the firmware version");
        } else if outdated {
            log::warn!(
                "modem firmware is outdated, latest known is {}",
                EG25_LATEST_KNOWN_FIRMWARE
            );
        }

        Ok(())
    }

    /// Check `AT+QDAI` against the configured value, update it and restart
    /// the modem when it differs. The setting only takes effect after a
    /// restart.
    fn configure_audio<IO: ModemIo>(
        &self,
        io: &mut IO,
        config: &ModemConfig,
    ) -> Result<(), Error<IO::Error>> {
        let Some(qdai) = config.qdai else {
            return Ok(());
        };

        at_cmd_retry(io, "AT+QDAI?", 1000, 15, false)?;
        if response_value(io.response(), "+QDAI: ") == Some(qdai) {
            return Ok(());
        }

        log::info!("updating the digital audio interface setup");

        let mut cmd: String<64> = String::new();
        let _ = write!(cmd, "AT+QDAI={}", qdai);
        if io.at_cmd(&cmd, 5000) != AtResult::Ok {
            log::error!("failed to update the digital audio interface setup");
            return Err(Error::Protocol(ProtocolError::AtCommand));
        }

        // a fast poweroff would skip saving the new setting
        let _ = io.at_cmd("AT+QCFG=\"fast/poweroff\",0", 5000);
        if io.at_cmd("AT+CFUN=1,1", 5000) != AtResult::Ok {
            log::error!("failed to restart the modem");
            return Err(Error::Protocol(ProtocolError::AtCommand));
        }

        io.delay_ms(6000);
        at_cmd_retry(io, "AT&FE0", 1000, 30, true)?;

        at_cmd_retry(io, "AT+QDAI?", 1000, 15, false)?;
        if response_value(io.response(), "+QDAI: ") != Some(qdai) {
            log::warn!("digital audio interface setup did not stick");
        }

        Ok(())
    }

    /// Bring the `AT+QCFG` settings table in line with what the host
    /// expects. Individual failures are logged and skipped, the modem is
    /// usable without them.
    fn sync_qcfg<IO: ModemIo>(&self, io: &mut IO) {
        for entry in &QCFG_TABLE {
            let mut cmd: String<128> = String::new();
            let _ = write!(cmd, "AT+QCFG=\"{}\"", entry.name);
            if io.at_cmd(&cmd, 1000) != AtResult::Ok {
                log::warn!("could not query QCFG {}", entry.name);
                continue;
            }

            let mut prefix: String<64> = String::new();
            let _ = write!(prefix, "+QCFG: \"{}\",", entry.name);
            let current_ok = match response_value(io.response(), &prefix) {
                Some(current) => match entry.is_ok {
                    Some(is_ok) => is_ok(current),
                    None => current == entry.value,
                },
                None => false,
            };
            if current_ok {
                continue;
            }

            log::info!("updating QCFG {} to {}", entry.name, entry.value);
            cmd.clear();
            let _ = write!(cmd, "AT+QCFG=\"{}\",{}", entry.name, entry.value);
            if io.at_cmd(&cmd, 1000) != AtResult::Ok {
                log::warn!("could not update QCFG {}", entry.name);
            }
        }
    }
}

fn pulse_power_key<IO: ModemIo>(io: &mut IO, config: &ModemConfig, width_ms: u32) {
    io.drive(OutputLine::PowerKey, true);
    io.delay_ms(width_ms);
    io.drive(OutputLine::PowerKey, false);

    // on some boards the power key shares a pin with the status line
    if config.status_pwrkey_multiplexed {
        io.release(OutputLine::PowerKey);
    }
}

/// Wait for the ring indicator to rise and the status line to fall. Lines
/// the board does not wire are assumed good.
fn wait_for_boot<IO: ModemIo>(io: &mut IO) -> Result<(), Error<IO::Error>> {
    for _ in 0..EG25_BOOT_TRIES {
        let awake = io.sense(InputLine::Wakeup).unwrap_or(true);
        let powered = !io.sense(InputLine::Status).unwrap_or(false);
        if awake && powered {
            return Ok(());
        }
        io.delay_ms(EG25_BOOT_POLL_MS);
    }

    if io.sense(InputLine::Wakeup) == Some(false) {
        log::error!("modem never woke up, it looks kill-switched");
        return Err(Error::Timeout(TimeoutError::ModemWakeup));
    }

    log::error!("modem never reported power-up success");
    Err(Error::Timeout(TimeoutError::ModemStatus))
}

/// Release every control line and cut the rail, leaving nothing back-feeding
/// the unpowered modem
fn power_off<IO: ModemIo>(io: &mut IO) {
    io.release(OutputLine::Dtr);
    io.release(OutputLine::PowerKey);
    io.release(OutputLine::Reset);
    io.release(OutputLine::Sleep);
    io.release(OutputLine::Enable);
    io.release(OutputLine::HostReady);
    io.disable_power();
}
