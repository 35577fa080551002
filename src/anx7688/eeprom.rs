//! EEPROM firmware programmer
//!
//! The OCM boots from an external EEPROM reachable through a 16-byte access
//! window on the firmware interface. Flashing holds the controller in reset,
//! unlocks the write-protect bits and streams the image in aligned blocks;
//! the first 16 bytes of the address space belong to the boot block and are
//! never touched.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::i2c::I2c;

use crate::anx7688::registers::*;
use crate::anx7688::{Anx7688, ConnectionState};
use crate::error::{ConfigError, Error, TimeoutError};
use crate::hal::{Regulator, TypecPort, VbusInSupply};

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
    fn eeprom_set_address(&mut self, addr: u16) -> Result<(), Error<I2C::Error>> {
        self.write_register(ANX7688_REG_EEPROM_ADDR_HIGH, (addr >> 8) as u8)?;
        self.write_register(ANX7688_REG_EEPROM_ADDR_LOW, addr as u8)
    }

    fn eeprom_wait_done(&mut self) -> Result<(), Error<I2C::Error>> {
        for _ in 0..ANX7688_EEPROM_DONE_TRIES {
            let ctrl = self.read_register(ANX7688_REG_EEPROM_CTRL)?;
            if ctrl & ANX7688_EEPROM_CTRL_DONE != 0 {
                return Ok(());
            }
            self.delay.delay_us(ANX7688_EEPROM_DONE_POLL_US);
        }

        log::error!("EEPROM access never completed");
        Err(Error::Timeout(TimeoutError::EepromDone))
    }

    fn eeprom_wait_ready(&mut self) -> Result<(), Error<I2C::Error>> {
        for _ in 0..ANX7688_EEPROM_READY_TRIES {
            let status = self.read_register(ANX7688_REG_EEPROM_ACCESS_STATUS)?;
            if status & 0x0f == ANX7688_EEPROM_ACCESS_READY {
                return Ok(());
            }
            self.delay.delay_ms(ANX7688_EEPROM_READY_POLL_MS);
        }

        log::error!("EEPROM controller never became ready");
        Err(Error::Timeout(TimeoutError::EepromReady))
    }

    /// Read one aligned block; the chip must be powered and prepared
    pub fn read_firmware(
        &mut self,
        addr: u16,
        buf: &mut [u8; ANX7688_EEPROM_BLOCK_SIZE],
    ) -> Result<(), Error<I2C::Error>> {
        self.eeprom_set_address(addr)?;
        self.write_register(ANX7688_REG_EEPROM_CTRL, ANX7688_EEPROM_CTRL_READ)?;
        self.eeprom_wait_done()?;
        self.read_block(self.addr, ANX7688_REG_EEPROM_DATA0, buf)
    }

    fn eeprom_write_block(
        &mut self,
        addr: u16,
        data: &[u8; ANX7688_EEPROM_BLOCK_SIZE],
    ) -> Result<(), Error<I2C::Error>> {
        self.eeprom_set_address(addr)?;
        self.write_block(self.addr, ANX7688_REG_EEPROM_DATA0, data)?;
        self.write_register(ANX7688_REG_EEPROM_CTRL, ANX7688_EEPROM_CTRL_WRITE)?;
        self.eeprom_wait_done()
    }

    /// Take exclusive control of the chip for direct EEPROM access
    fn eeprom_prepare(&mut self) -> Result<(), Error<I2C::Error>> {
        if self.state == ConnectionState::Connected {
            self.disconnect();
        }
        self.state = ConnectionState::FirmwareFlashing;

        self.delay.delay_ms(20);
        self.power_enable();

        // the OCM must not execute from the EEPROM while we use it
        let ret = self
            .update_register_bits(
                ANX7688_REG_USBC_RESET_CTRL,
                ANX7688_USBC_RESET_CTRL_OCM_RESET,
                ANX7688_USBC_RESET_CTRL_OCM_RESET,
            )
            .and_then(|_| self.eeprom_wait_ready());

        if ret.is_err() {
            self.power_disable();
            self.state = ConnectionState::Disconnected;
        } else {
            self.delay.delay_ms(10);
        }
        ret
    }

    fn eeprom_finish(&mut self, now_ms: u64) {
        self.power_disable();
        self.state = ConnectionState::Disconnected;
        // re-evaluate the cable with the OCM running again
        self.work.schedule(now_ms + ANX7688_RECONNECT_DELAY_MS);
    }

    /// Program a firmware image into the EEPROM.
    ///
    /// The image lands behind the 16-byte boot block; its tail is padded
    /// with zeros to the block size. Success clears the firmware-failure
    /// latch; the chip is left unpowered with a cable re-evaluation
    /// scheduled.
    pub fn flash_firmware(&mut self, image: &[u8], now_ms: u64) -> Result<(), Error<I2C::Error>> {
        if image.is_empty() {
            return Err(Error::Config(ConfigError::InvalidParameter));
        }
        if image.len() > ANX7688_EEPROM_FW_CAPACITY {
            return Err(Error::Config(ConfigError::ImageTooLarge));
        }

        self.eeprom_prepare()?;
        let ret = self.flash_blocks(image);
        if ret.is_ok() {
            self.fw_failed = false;
            log::info!("firmware flashed ({} bytes)", image.len());
        }
        self.eeprom_finish(now_ms);
        ret
    }

    fn flash_blocks(&mut self, image: &[u8]) -> Result<(), Error<I2C::Error>> {
        self.update_register_bits(
            ANX7688_REG_EEPROM_UNLOCK0,
            ANX7688_EEPROM_UNLOCK0_BITS,
            ANX7688_EEPROM_UNLOCK0_BITS,
        )?;
        self.update_register_bits(
            ANX7688_REG_EEPROM_UNLOCK1,
            ANX7688_EEPROM_UNLOCK1_BITS,
            ANX7688_EEPROM_UNLOCK1_BITS,
        )?;
        self.update_register_bits(
            ANX7688_REG_EEPROM_UNLOCK2,
            ANX7688_EEPROM_UNLOCK2_BITS,
            ANX7688_EEPROM_UNLOCK2_BITS,
        )?;

        let mut block = [0u8; ANX7688_EEPROM_BLOCK_SIZE];
        for (i, chunk) in image.chunks(ANX7688_EEPROM_BLOCK_SIZE).enumerate() {
            block.fill(0);
            block[..chunk.len()].copy_from_slice(chunk);

            let addr = ANX7688_EEPROM_FW_OFFSET + (i * ANX7688_EEPROM_BLOCK_SIZE) as u16;
            self.eeprom_write_block(addr, &block)?;
        }

        Ok(())
    }

    /// Read the firmware image back into `out`, which must be a whole
    /// number of blocks. The chip is power-cycled around the dump.
    pub fn dump_firmware(&mut self, out: &mut [u8], now_ms: u64) -> Result<(), Error<I2C::Error>> {
        if out.is_empty() || out.len() % ANX7688_EEPROM_BLOCK_SIZE != 0 {
            return Err(Error::Config(ConfigError::InvalidParameter));
        }
        if out.len() > ANX7688_EEPROM_FW_CAPACITY {
            return Err(Error::Config(ConfigError::ImageTooLarge));
        }

        self.eeprom_prepare()?;
        let ret = self.dump_blocks(out);
        self.eeprom_finish(now_ms);
        ret
    }

    fn dump_blocks(&mut self, out: &mut [u8]) -> Result<(), Error<I2C::Error>> {
        let mut block = [0u8; ANX7688_EEPROM_BLOCK_SIZE];
        for (i, chunk) in out.chunks_mut(ANX7688_EEPROM_BLOCK_SIZE).enumerate() {
            let addr = ANX7688_EEPROM_FW_OFFSET + (i * ANX7688_EEPROM_BLOCK_SIZE) as u16;
            self.read_firmware(addr, &mut block)?;
            chunk.copy_from_slice(&block);
        }

        Ok(())
    }
}
