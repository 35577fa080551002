//! Fibocom MG2723 power sequences
//!
//! A much simpler device than the EG25: no power key, no status feedback,
//! no AT configuration pass. Power-up is rail plus enable plus a reset
//! pulse, and the reset pulse alone restarts a running modem.

use crate::error::Error;
use crate::modem::{ModemConfig, ModemIo, ModemVariant, OutputLine};

/// Reset pulse width, in ms
const MG2723_RESET_PULSE_MS: u32 = 300;

/// Fibocom MG2723
pub struct Mg2723;

impl<IO: ModemIo> ModemVariant<IO> for Mg2723 {
    fn power_init(&self, io: &mut IO, _config: &ModemConfig) -> Result<(), Error<IO::Error>> {
        if io.power_is_enabled() {
            // the bootloader left the modem running; keep it quiet until
            // the host asks for it
            io.drive(OutputLine::Enable, false);
            io.drive(OutputLine::Reset, true);
        } else {
            io.release(OutputLine::Enable);
            io.release(OutputLine::Reset);
        }
        Ok(())
    }

    fn power_up(&self, io: &mut IO, _config: &ModemConfig) -> Result<(), Error<IO::Error>> {
        io.enable_power().map_err(|e| {
            log::error!("failed to enable the power rail: {:?}", e);
            Error::Supply
        })?;

        io.drive(OutputLine::Enable, true);
        pulse_reset(io);
        Ok(())
    }

    fn power_down(&self, io: &mut IO, _config: &ModemConfig) -> Result<(), Error<IO::Error>> {
        io.drive(OutputLine::Enable, false);
        io.delay_ms(50);
        io.disable_power();

        io.release(OutputLine::Enable);
        io.release(OutputLine::Reset);
        Ok(())
    }

    fn reset(&self, io: &mut IO) -> Result<(), Error<IO::Error>> {
        pulse_reset(io);
        Ok(())
    }
}

fn pulse_reset<IO: ModemIo>(io: &mut IO) {
    io.drive(OutputLine::Reset, true);
    io.delay_ms(MG2723_RESET_PULSE_MS);
    io.drive(OutputLine::Reset, false);
}
