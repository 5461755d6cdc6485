//! EMMC (Arasan SDHCI) driver for the SD card slot.
//!
//! Polled, single block size of 512 bytes. Every wait is bounded by a budget in milliseconds
//! from [`Timeouts`] and fails with its own [`EmmcError`] when it runs out.

use crate::{
    bsp::drivers::common::{MmioBus, RegisterBus},
    bus_registers, cpu, driver, info,
    storage::{BlockDevice, SECTOR_SIZE},
    synchronization::{interface::Mutex, NullLock},
    time::{interface::Delay, SystemTimer},
};
use core::fmt;
use tock_registers::{
    interfaces::{ReadWriteable, Readable, Writeable},
    register_bitfields,
};

register_bitfields! {
    u32,

    /// Host configuration bits.
    CONTROL1 [
        /// Reset the complete host circuit.
        SRST_HC OFFSET(24) NUMBITS(1) [],

        /// Data timeout unit exponent.
        DATA_TOUNIT OFFSET(16) NUMBITS(4) [
            Max = 0b1110
        ],

        /// SD clock divider, low 8 bits.
        CLK_FREQ8 OFFSET(8) NUMBITS(8) [],

        /// SD clock divider, high 2 bits.
        CLK_FREQ_MS2 OFFSET(6) NUMBITS(2) [],

        /// SD clock enable.
        CLK_EN OFFSET(2) NUMBITS(1) [],

        /// SD clock stable.
        CLK_STABLE OFFSET(1) NUMBITS(1) [],

        /// Internal clock enable.
        CLK_INTLEN OFFSET(0) NUMBITS(1) []
    ],

    /// Host controller version.
    SLOTISR_VER [
        SDVERSION OFFSET(16) NUMBITS(8) []
    ]
}

/// Command codes, already in CMDTM layout.
mod cmd {
    pub const GO_IDLE: u32 = 0x0000_0000;
    pub const ALL_SEND_CID: u32 = 0x0201_0000;
    pub const SEND_REL_ADDR: u32 = 0x0302_0000;
    pub const CARD_SELECT: u32 = 0x0703_0000;
    pub const SEND_IF_COND: u32 = 0x0802_0000;
    pub const STOP_TRANS: u32 = 0x0C03_0000;
    pub const READ_SINGLE: u32 = 0x1122_0010;
    pub const READ_MULTI: u32 = 0x1222_0032;
    pub const SET_BLOCKCNT: u32 = 0x1702_0000;
    pub const APP_CMD: u32 = 0x3700_0000;

    /// Application commands, each preceded by APP_CMD.
    pub const SET_BUS_WIDTH: u32 = 0x0602_0000;
    pub const SEND_OP_COND: u32 = 0x2902_0000;
    pub const SEND_SCR: u32 = 0x3322_0010;

    pub const RSPNS_48: u32 = 0x0002_0000;
    pub const ERRORS_MASK: u32 = 0xfff9_c004;
    pub const RCA_MASK: u32 = 0xffff_0000;
}

mod status {
    pub const CMD_INHIBIT: u32 = 0x0000_0001;
    pub const DAT_INHIBIT: u32 = 0x0000_0002;
    pub const APP_CMD: u32 = 0x0000_0020;
    pub const READ_AVAILABLE: u32 = 0x0000_0800;
}

mod int {
    pub const CMD_DONE: u32 = 0x0000_0001;
    pub const READ_RDY: u32 = 0x0000_0020;
    pub const CMD_TIMEOUT: u32 = 0x0001_0000;
    pub const DATA_TIMEOUT: u32 = 0x0010_0000;
    pub const ERROR_MASK: u32 = 0x017E_8000;
}

mod scr {
    pub const SD_BUS_WIDTH_4: u32 = 0x0000_0400;
    pub const SUPP_SET_BLKCNT: u32 = 0x0200_0000;
    /// Software flag: the card is block addressed.
    pub const SUPP_CCS: u32 = 0x0000_0001;
}

mod acmd41 {
    pub const VOLTAGE: u32 = 0x00ff_8000;
    pub const CMD_COMPLETE: u32 = 0x8000_0000;
    pub const CMD_CCS: u32 = 0x4000_0000;
    pub const ARG_HC: u32 = 0x51ff_8000;
}

const HOST_SPEC_V2: u32 = 1;
const IF_COND_CHECK_PATTERN: u32 = 0x0000_01AA;
const IDENTIFICATION_CLOCK_HZ: u32 = 400_000;
const TRANSFER_CLOCK_HZ: u32 = 25_000_000;
const WORDS_PER_BLOCK: usize = SECTOR_SIZE / 4;

/// EMMC errors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EmmcError {
    /// The host controller did not leave reset.
    ResetTimeout,
    /// The SD clock never reported stable.
    ClockTimeout,
    /// Command or data lines stayed busy.
    InhibitTimeout,
    /// No command completion.
    CommandTimeout,
    /// No data ready.
    DataTimeout,
    /// The card never finished power-up.
    PowerUpTimeout,
    /// The controller or the card flagged an error.
    CommandError,
    /// The card rejected the offered voltage range.
    VoltageMismatch,
    /// A transfer request that cannot be satisfied.
    DataError,
    /// Block access before a successful init.
    NotInitialized,
}

impl EmmcError {
    pub const fn code(self) -> u32 {
        match self {
            EmmcError::ResetTimeout => 1,
            EmmcError::ClockTimeout => 2,
            EmmcError::InhibitTimeout => 3,
            EmmcError::CommandTimeout => 4,
            EmmcError::DataTimeout => 5,
            EmmcError::PowerUpTimeout => 6,
            EmmcError::CommandError => 7,
            EmmcError::VoltageMismatch => 8,
            EmmcError::DataError => 9,
            EmmcError::NotInitialized => 10,
        }
    }

    /// Whether a bounded wait ran out.
    pub const fn is_timeout(self) -> bool {
        matches!(
            self,
            EmmcError::ResetTimeout
                | EmmcError::ClockTimeout
                | EmmcError::InhibitTimeout
                | EmmcError::CommandTimeout
                | EmmcError::DataTimeout
                | EmmcError::PowerUpTimeout
        )
    }
}

impl fmt::Display for EmmcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EmmcError::ResetTimeout => "controller reset timeout",
            EmmcError::ClockTimeout => "clock not stable",
            EmmcError::InhibitTimeout => "command/data lines busy",
            EmmcError::CommandTimeout => "command timeout",
            EmmcError::DataTimeout => "data timeout",
            EmmcError::PowerUpTimeout => "card power-up timeout",
            EmmcError::CommandError => "command error",
            EmmcError::VoltageMismatch => "voltage mismatch",
            EmmcError::DataError => "data error",
            EmmcError::NotInitialized => "card not initialized",
        };
        write!(f, "{} (code {})", s, self.code())
    }
}

/// Budgets of the bounded waits.
#[derive(Copy, Clone, Debug)]
pub struct Timeouts {
    /// Host reset, polled every 10 ms.
    pub reset_ms: u64,
    /// Clock stable, polled every 10 ms.
    pub clock_stable_ms: u64,
    /// Line inhibit before a command or a clock change, polled every ms.
    pub inhibit_ms: u64,
    /// Command completion and data ready, polled every ms.
    pub interrupt_ms: u64,
    /// SCR words, polled every ms.
    pub data_ms: u64,
    /// ACMD41 attempts.
    pub op_cond_retries: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            reset_ms: 100_000,
            clock_stable_ms: 100_000,
            inhibit_ms: 500_000,
            interrupt_ms: 1_000_000,
            data_ms: 100_000,
            op_cond_retries: 6,
        }
    }
}

/// SDHCI clock divider bits for `target_hz`.
///
/// v2 hosts take an 8-bit power-of-two field that divides by twice its value; v3 hosts take a
/// 10-bit plain divider split over two fields.
pub const fn clock_divider(base_hz: u32, target_hz: u32, host_version: u32) -> u32 {
    let c = base_hz / target_hz;
    let x = c.saturating_sub(1);

    let s = if x == 0 {
        0
    } else {
        let bits = 32 - x.leading_zeros();
        let s = bits - 1;
        if s > 7 {
            7
        } else {
            s
        }
    };

    let mut d = if host_version > HOST_SPEC_V2 { c } else { 1 << s };
    if d <= 2 {
        d = 2;
    }

    let h = if host_version > HOST_SPEC_V2 {
        (d & 0x300) >> 2
    } else {
        0
    };

    ((d & 0xff) << 8) | h
}

struct EmmcInner<B, D> {
    bus: B,
    delay: D,
    timeouts: Timeouts,
    base_clock_hz: u32,
    host_version: u32,
    rca: u32,
    scr: [u32; 2],
    initialized: bool,
}

impl<B: RegisterBus, D: Delay> EmmcInner<B, D> {
    bus_registers! {
        BLKSIZECNT @ 0x04 => (),
        ARG1 @ 0x08 => (),
        CMDTM @ 0x0C => (),
        RESP0 @ 0x10 => (),
        RESP1 @ 0x14 => (),
        RESP2 @ 0x18 => (),
        RESP3 @ 0x1C => (),
        DATA @ 0x20 => (),
        STATUS @ 0x24 => (),
        CONTROL0 @ 0x28 => (),
        CONTROL1 @ 0x2C => CONTROL1::Register,
        INTERRUPT @ 0x30 => (),
        INT_MASK @ 0x34 => (),
        INT_EN @ 0x38 => (),
        SLOTISR_VER @ 0xFC => SLOTISR_VER::Register,
    }

    /// Poll `done` every `step_ms` until it holds or `budget_ms` is used up.
    fn poll(&self, budget_ms: u64, step_ms: u64, mut done: impl FnMut(&Self) -> bool) -> bool {
        let mut waited = 0;
        loop {
            if done(self) {
                return true;
            }
            if waited >= budget_ms {
                return false;
            }
            self.delay.delay_ms(step_ms);
            waited += step_ms;
        }
    }

    fn block_addressed(&self) -> bool {
        self.scr[0] & scr::SUPP_CCS != 0
    }

    /// Wait for the `mask` lines of STATUS to go idle.
    fn wait_status(&self, mask: u32) -> Result<(), EmmcError> {
        let idle = self.poll(self.timeouts.inhibit_ms, 1, |s| {
            s.STATUS().get() & mask == 0 || s.INTERRUPT().get() & int::ERROR_MASK != 0
        });

        if !idle || self.INTERRUPT().get() & int::ERROR_MASK != 0 {
            return Err(EmmcError::InhibitTimeout);
        }
        Ok(())
    }

    /// Wait for the `mask` interrupt and acknowledge it.
    fn wait_interrupt(&self, mask: u32, on_timeout: EmmcError) -> Result<(), EmmcError> {
        let m = mask | int::ERROR_MASK;
        let raised = self.poll(self.timeouts.interrupt_ms, 1, |s| {
            s.INTERRUPT().get() & m != 0
        });

        let r = self.INTERRUPT().get();
        if !raised || r & (int::CMD_TIMEOUT | int::DATA_TIMEOUT) != 0 {
            self.INTERRUPT().set(r);
            return Err(on_timeout);
        }
        if r & int::ERROR_MASK != 0 {
            self.INTERRUPT().set(r);
            return Err(EmmcError::CommandError);
        }

        self.INTERRUPT().set(mask);
        Ok(())
    }

    /// Issue a command and decode its response.
    fn command(&mut self, code: u32, arg: u32) -> Result<u32, EmmcError> {
        self.wait_status(status::CMD_INHIBIT)?;

        // Acknowledge anything still pending.
        let pending = self.INTERRUPT().get();
        self.INTERRUPT().set(pending);
        self.ARG1().set(arg);
        self.CMDTM().set(code);

        match code {
            cmd::SEND_OP_COND => self.delay.delay_ms(1000),
            cmd::SEND_IF_COND | cmd::APP_CMD => self.delay.delay_ms(100),
            _ => {}
        }

        self.wait_interrupt(int::CMD_DONE, EmmcError::CommandTimeout)?;

        let r = self.RESP0().get();
        match code {
            cmd::GO_IDLE | cmd::APP_CMD => Ok(0),
            c if c == cmd::APP_CMD | cmd::RSPNS_48 => Ok(r & status::APP_CMD),
            cmd::SEND_OP_COND => Ok(r),
            cmd::SEND_IF_COND if r == arg => Ok(0),
            cmd::SEND_IF_COND => Err(EmmcError::VoltageMismatch),
            cmd::ALL_SEND_CID => {
                Ok(r | self.RESP3().get() | self.RESP2().get() | self.RESP1().get())
            }
            cmd::SEND_REL_ADDR => {
                // R6 packs the card status bits 23, 22, 19 and 12:0 into its low half.
                let err = ((r & 0x1fff)
                    | ((r & 0x2000) << 6)
                    | ((r & 0x4000) << 8)
                    | ((r & 0x8000) << 8))
                    & cmd::ERRORS_MASK;
                if err != 0 {
                    return Err(EmmcError::CommandError);
                }
                Ok(r & cmd::RCA_MASK)
            }
            _ => Ok(r & cmd::ERRORS_MASK),
        }
    }

    /// Issue APP_CMD followed by `code`.
    fn app_command(&mut self, code: u32, arg: u32) -> Result<u32, EmmcError> {
        if self.rca == 0 {
            self.command(cmd::APP_CMD, 0)?;
        } else if self.command(cmd::APP_CMD | cmd::RSPNS_48, self.rca)? == 0 {
            return Err(EmmcError::CommandError);
        }

        self.command(code, arg)
    }

    fn set_clock(&mut self, target_hz: u32) -> Result<(), EmmcError> {
        let idle = self.poll(self.timeouts.inhibit_ms, 1, |s| {
            s.STATUS().get() & (status::CMD_INHIBIT | status::DAT_INHIBIT) == 0
        });
        if !idle {
            return Err(EmmcError::InhibitTimeout);
        }

        self.CONTROL1().modify(CONTROL1::CLK_EN::CLEAR);
        self.delay.delay_ms(10);

        let divider = clock_divider(self.base_clock_hz, target_hz, self.host_version);
        let c1 = (self.CONTROL1().get() & 0xffff_003f) | divider;
        self.CONTROL1().set(c1);
        self.delay.delay_ms(10);

        self.CONTROL1().modify(CONTROL1::CLK_EN::SET);
        self.delay.delay_ms(10);

        let stable = self.poll(self.timeouts.clock_stable_ms, 10, |s| {
            s.CONTROL1().is_set(CONTROL1::CLK_STABLE)
        });
        if !stable {
            return Err(EmmcError::ClockTimeout);
        }

        Ok(())
    }

    fn reset(&mut self) -> Result<(), EmmcError> {
        self.CONTROL0().set(0);
        self.CONTROL1().modify(CONTROL1::SRST_HC::SET);

        let mut waited = 0;
        loop {
            self.delay.delay_ms(10);
            waited += 10;
            if !self.CONTROL1().is_set(CONTROL1::SRST_HC) {
                break;
            }
            if waited >= self.timeouts.reset_ms {
                return Err(EmmcError::ResetTimeout);
            }
        }

        self.CONTROL1()
            .modify(CONTROL1::CLK_INTLEN::SET + CONTROL1::DATA_TOUNIT::Max);
        self.delay.delay_ms(10);

        Ok(())
    }

    /// Poll ACMD41 until the card reports power-up done. Returns whether it is block addressed.
    fn power_up(&mut self) -> Result<bool, EmmcError> {
        let mut response = 0;
        let mut tries = 0;

        while response & acmd41::CMD_COMPLETE == 0 {
            if tries == self.timeouts.op_cond_retries {
                return Err(EmmcError::PowerUpTimeout);
            }
            tries += 1;

            cpu::spin_for_cycles(400);
            match self.app_command(cmd::SEND_OP_COND, acmd41::ARG_HC) {
                Ok(r) => response = r,
                Err(x) if x.is_timeout() => continue,
                Err(x) => return Err(x),
            }
        }

        if response & acmd41::VOLTAGE == 0 {
            return Err(EmmcError::VoltageMismatch);
        }

        Ok(response & acmd41::CMD_CCS != 0)
    }

    fn read_scr(&mut self) -> Result<(), EmmcError> {
        self.wait_status(status::DAT_INHIBIT)?;

        self.BLKSIZECNT().set((1 << 16) | 8);
        self.app_command(cmd::SEND_SCR, 0)?;
        self.wait_interrupt(int::READ_RDY, EmmcError::DataTimeout)?;

        let mut words = 0;
        let mut scr = [0u32; 2];
        let done = self.poll(self.timeouts.data_ms, 1, |s| {
            while words < 2 && s.STATUS().get() & status::READ_AVAILABLE != 0 {
                scr[words] = s.DATA().get();
                words += 1;
            }
            words == 2
        });
        if !done {
            return Err(EmmcError::DataTimeout);
        }

        self.scr = scr;
        Ok(())
    }

    fn init(&mut self) -> Result<(), EmmcError> {
        self.initialized = false;
        self.host_version = self.SLOTISR_VER().read(SLOTISR_VER::SDVERSION);
        info!("[SD] Host controller version: {}", self.host_version);

        self.reset()?;
        self.set_clock(IDENTIFICATION_CLOCK_HZ)?;

        self.INT_EN().set(0xffff_ffff);
        self.INT_MASK().set(0xffff_ffff);

        self.scr = [0; 2];
        self.rca = 0;

        self.command(cmd::GO_IDLE, 0)?;
        self.command(cmd::SEND_IF_COND, IF_COND_CHECK_PATTERN)?;

        let block_addressed = self.power_up()?;

        self.command(cmd::ALL_SEND_CID, 0)?;
        self.rca = self.command(cmd::SEND_REL_ADDR, 0)?;
        info!("[SD] RCA: {:#010x}", self.rca);

        self.set_clock(TRANSFER_CLOCK_HZ)?;
        self.command(cmd::CARD_SELECT, self.rca)?;

        self.read_scr()?;

        if self.scr[0] & scr::SD_BUS_WIDTH_4 != 0 {
            self.app_command(cmd::SET_BUS_WIDTH, self.rca | 2)?;
            let c0 = self.CONTROL0().get();
            self.CONTROL0().set(c0 | 0x2);
        }

        self.scr[0] &= !scr::SUPP_CCS;
        if block_addressed {
            self.scr[0] |= scr::SUPP_CCS;
            info!("[SD] SDHC/SDXC card (block addressing)");
        } else {
            info!("[SD] SDSC card (byte addressing)");
        }

        self.initialized = true;
        Ok(())
    }

    fn read_blocks(&mut self, lba: u32, count: u32, dest: &mut [u8]) -> Result<(), EmmcError> {
        if !self.initialized {
            return Err(EmmcError::NotInitialized);
        }
        if count == 0 {
            return Ok(());
        }
        if dest.len() < count as usize * SECTOR_SIZE {
            return Err(EmmcError::DataError);
        }

        self.wait_status(status::DAT_INHIBIT)?;

        let block_addressed = self.block_addressed();
        let set_block_count = self.scr[0] & scr::SUPP_SET_BLKCNT != 0;

        if block_addressed {
            if count > 1 && set_block_count {
                self.command(cmd::SET_BLOCKCNT, count)?;
            }
            self.BLKSIZECNT().set((count << 16) | SECTOR_SIZE as u32);
            let code = if count == 1 {
                cmd::READ_SINGLE
            } else {
                cmd::READ_MULTI
            };
            self.command(code, lba)?;
        } else {
            self.BLKSIZECNT().set((1 << 16) | SECTOR_SIZE as u32);
        }

        for (i, block) in dest
            .chunks_exact_mut(SECTOR_SIZE)
            .take(count as usize)
            .enumerate()
        {
            if !block_addressed {
                // Byte addressed cards get one single-block read per block.
                let address = (lba + i as u32)
                    .checked_mul(SECTOR_SIZE as u32)
                    .ok_or(EmmcError::DataError)?;
                self.command(cmd::READ_SINGLE, address)?;
            }

            self.wait_interrupt(int::READ_RDY, EmmcError::DataTimeout)?;

            for word in block.chunks_exact_mut(4).take(WORDS_PER_BLOCK) {
                word.copy_from_slice(&self.DATA().get().to_le_bytes());
            }
        }

        if count > 1 && block_addressed && !set_block_count {
            self.command(cmd::STOP_TRANS, 0)?;
        }

        Ok(())
    }
}

/// Representation of the EMMC controller with the card behind it.
pub struct Emmc<B = MmioBus, D = SystemTimer> {
    inner: NullLock<EmmcInner<B, D>>,
}

impl<B: RegisterBus, D: Delay> Emmc<B, D> {
    pub const COMPATIBLE: &'static str = "BCM EMMC (SDHCI)";

    /// Create an instance.
    ///
    /// # Safety
    ///
    /// - The user must ensure to provide a bus for the correct MMIO start address.
    pub const unsafe fn new(bus: B, delay: D, base_clock_hz: u32, timeouts: Timeouts) -> Self {
        Self {
            inner: NullLock::new(EmmcInner {
                bus,
                delay,
                timeouts,
                base_clock_hz,
                host_version: 0,
                rca: 0,
                scr: [0; 2],
                initialized: false,
            }),
        }
    }

    /// Whether the card uses block instead of byte addresses.
    pub fn is_block_addressed(&self) -> bool {
        self.inner.lock(|inner| inner.block_addressed())
    }
}

impl<B: RegisterBus, D: Delay> driver::interface::DeviceDriver for Emmc<B, D> {
    type Error = EmmcError;

    fn compatible(&self) -> &'static str {
        Self::COMPATIBLE
    }

    unsafe fn init(&self) -> Result<(), Self::Error> {
        self.inner.lock(|inner| inner.init())
    }
}

impl<B: RegisterBus, D: Delay> BlockDevice for Emmc<B, D> {
    type Error = EmmcError;

    fn read_blocks(&mut self, lba: u32, count: u32, dest: &mut [u8]) -> Result<(), EmmcError> {
        self.inner.lock(|inner| inner.read_blocks(lba, count, dest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bsp::drivers::common::test_support::FakeBus, driver::interface::DeviceDriver,
        time::test_support::SimDelay,
    };
    use std::{cell::Cell, rc::Rc, vec::Vec};

    const CMDTM: usize = 0x0C;
    const ARG1: usize = 0x08;
    const BLKSIZECNT: usize = 0x04;
    const RESP0: usize = 0x10;
    const DATA: usize = 0x20;
    const STATUS: usize = 0x24;
    const CONTROL0: usize = 0x28;
    const CONTROL1: usize = 0x2C;
    const INTERRUPT: usize = 0x30;

    const SRST_HC: u32 = 1 << 24;
    const CLK_STABLE: u32 = 1 << 1;

    const BASE_CLOCK: u32 = 41_666_666;

    fn emmc<'a>(
        bus: &'a FakeBus,
        sim: &'a SimDelay,
        timeouts: Timeouts,
    ) -> Emmc<&'a FakeBus, &'a SimDelay> {
        unsafe { Emmc::new(bus, sim, BASE_CLOCK, timeouts) }
    }

    /// A controller that leaves reset at once and always has a stable clock.
    fn healthy_controller(bus: &FakeBus) {
        bus.on_write(|regs, offset, _| {
            if offset == CONTROL1 {
                regs[CONTROL1 / 4] &= !SRST_HC;
                regs[CONTROL1 / 4] |= CLK_STABLE;
            }
        });
    }

    /// A card that is always ready. RESP0 answers per command, DATA counts up.
    fn ready_card(bus: &FakeBus, ccs: bool) {
        let last_cmd = Rc::new(Cell::new(u32::MAX));
        let cmd_seen = last_cmd.clone();
        let data = Rc::new(Cell::new(0u32));

        bus.on_write(move |regs, offset, value| match offset {
            CONTROL1 => {
                regs[CONTROL1 / 4] &= !SRST_HC;
                regs[CONTROL1 / 4] |= CLK_STABLE;
            }
            CMDTM => cmd_seen.set(value),
            _ => {}
        });

        bus.on_read(move |regs, offset| match offset {
            INTERRUPT => Some(0x21),
            STATUS => Some(0x800),
            RESP0 => Some(match last_cmd.get() {
                cmd::SEND_IF_COND => regs[ARG1 / 4],
                cmd::SEND_OP_COND => {
                    acmd41::CMD_COMPLETE | 0x00ff_8000 | if ccs { acmd41::CMD_CCS } else { 0 }
                }
                cmd::SEND_REL_ADDR => 0x1234_0000,
                c if c == cmd::APP_CMD | cmd::RSPNS_48 => 0x20,
                _ => 0,
            }),
            DATA => {
                let v = data.get();
                data.set(v + 1);
                // SCR: 4-bit bus and SET_BLOCK_COUNT support.
                Some(match last_cmd.get() {
                    cmd::SEND_SCR if v == 0 => scr::SD_BUS_WIDTH_4 | scr::SUPP_SET_BLKCNT,
                    cmd::SEND_SCR => 0,
                    _ => v,
                })
            }
            _ => None,
        });
    }

    fn ready_driver<'a>(
        bus: &'a FakeBus,
        sim: &'a SimDelay,
        block_addressed: bool,
        set_block_count: bool,
    ) -> Emmc<&'a FakeBus, &'a SimDelay> {
        let emmc = emmc(bus, sim, Timeouts::default());
        emmc.inner.lock(|inner| {
            inner.initialized = true;
            inner.rca = 0x1234_0000;
            inner.scr[0] = if block_addressed { scr::SUPP_CCS } else { 0 }
                | if set_block_count { scr::SUPP_SET_BLKCNT } else { 0 };
        });
        emmc
    }

    #[test]
    fn clock_dividers() {
        assert_eq!(clock_divider(BASE_CLOCK, 400_000, 1), 0x4000);
        assert_eq!(clock_divider(BASE_CLOCK, 400_000, 2), 0x6800);
        assert_eq!(clock_divider(BASE_CLOCK, 25_000_000, 1), 0x0200);
        assert_eq!(clock_divider(BASE_CLOCK, 25_000_000, 2), 0x0200);
        // 10-bit divider: high bits land in CLK_FREQ_MS2.
        assert_eq!(clock_divider(BASE_CLOCK, 100_000, 2), (0xA0 << 8) | (0x100 >> 2));
    }

    #[test]
    fn reset_times_out_when_srst_never_clears() {
        let bus = FakeBus::new();
        let sim = SimDelay::new();
        let emmc = emmc(&bus, &sim, Timeouts::default());

        assert_eq!(unsafe { emmc.init() }, Err(EmmcError::ResetTimeout));
        assert_eq!(sim.elapsed_ms(), Timeouts::default().reset_ms);
    }

    #[test]
    fn clock_stable_times_out() {
        let bus = FakeBus::new();
        bus.on_write(|regs, offset, _| {
            if offset == CONTROL1 {
                regs[CONTROL1 / 4] &= !SRST_HC;
            }
        });
        let sim = SimDelay::new();
        let timeouts = Timeouts {
            clock_stable_ms: 500,
            ..Timeouts::default()
        };
        let emmc = emmc(&bus, &sim, timeouts);

        assert_eq!(unsafe { emmc.init() }, Err(EmmcError::ClockTimeout));
        assert!(sim.elapsed_ms() >= 500);
        assert!(sim.elapsed_ms() < 1000);
    }

    #[test]
    fn busy_lines_time_out_before_clock_change() {
        let bus = FakeBus::new();
        healthy_controller(&bus);
        bus.poke(STATUS, 0x3);
        let sim = SimDelay::new();
        let timeouts = Timeouts {
            inhibit_ms: 200,
            ..Timeouts::default()
        };
        let emmc = emmc(&bus, &sim, timeouts);

        assert_eq!(unsafe { emmc.init() }, Err(EmmcError::InhibitTimeout));
    }

    #[test]
    fn command_done_times_out() {
        let bus = FakeBus::new();
        healthy_controller(&bus);
        let sim = SimDelay::new();
        let timeouts = Timeouts {
            interrupt_ms: 250,
            ..Timeouts::default()
        };
        let emmc = emmc(&bus, &sim, timeouts);

        assert_eq!(unsafe { emmc.init() }, Err(EmmcError::CommandTimeout));
        // GO_IDLE is the first command.
        assert_eq!(bus.writes_to(CMDTM), [cmd::GO_IDLE]);
    }

    #[test]
    fn data_ready_times_out() {
        let bus = FakeBus::new();
        bus.on_read(|_, offset| match offset {
            INTERRUPT => Some(int::CMD_DONE),
            _ => None,
        });
        let sim = SimDelay::new();
        let mut emmc = ready_driver(&bus, &sim, true, true);
        emmc.inner.lock(|inner| inner.timeouts.interrupt_ms = 300);

        let mut buf = [0u8; SECTOR_SIZE];
        assert_eq!(emmc.read_block(10, &mut buf), Err(EmmcError::DataTimeout));
        assert!(sim.elapsed_ms() >= 300);
    }

    #[test]
    fn error_interrupt_after_command_is_a_command_error() {
        let bus = FakeBus::new();
        let issued = Rc::new(Cell::new(false));
        let seen = issued.clone();
        bus.on_write(move |_, offset, _| {
            if offset == CMDTM {
                seen.set(true);
            }
        });
        bus.on_read(move |_, offset| match offset {
            INTERRUPT if issued.get() => Some(0x0008_0000 | int::CMD_DONE),
            _ => None,
        });
        let sim = SimDelay::new();
        let mut emmc = ready_driver(&bus, &sim, true, false);

        let mut buf = [0u8; SECTOR_SIZE];
        assert_eq!(emmc.read_block(0, &mut buf), Err(EmmcError::CommandError));
        // The raised bits are acknowledged.
        assert_eq!(
            bus.writes_to(INTERRUPT).last().copied(),
            Some(0x0008_0000 | int::CMD_DONE)
        );
    }

    #[test]
    fn pending_error_blocks_the_lines() {
        let bus = FakeBus::new();
        bus.poke(INTERRUPT, 0x0008_0000);
        let sim = SimDelay::new();
        let mut emmc = ready_driver(&bus, &sim, true, false);

        let mut buf = [0u8; SECTOR_SIZE];
        assert_eq!(emmc.read_block(0, &mut buf), Err(EmmcError::InhibitTimeout));
        assert!(bus.writes_to(CMDTM).is_empty());
    }

    #[test]
    fn read_before_init_is_rejected() {
        let bus = FakeBus::new();
        let sim = SimDelay::new();
        let mut emmc = emmc(&bus, &sim, Timeouts::default());

        let mut buf = [0u8; SECTOR_SIZE];
        assert_eq!(emmc.read_block(0, &mut buf), Err(EmmcError::NotInitialized));
    }

    #[test]
    fn full_init_sequence() {
        let bus = FakeBus::new();
        ready_card(&bus, true);
        let sim = SimDelay::new();
        let emmc = emmc(&bus, &sim, Timeouts::default());

        assert_eq!(unsafe { emmc.init() }, Ok(()));
        assert!(emmc.is_block_addressed());
        assert_eq!(bus.peek(CONTROL0) & 0x2, 0x2);

        assert_eq!(
            bus.writes_to(CMDTM),
            [
                cmd::GO_IDLE,
                cmd::SEND_IF_COND,
                cmd::APP_CMD,
                cmd::SEND_OP_COND,
                cmd::ALL_SEND_CID,
                cmd::SEND_REL_ADDR,
                cmd::CARD_SELECT,
                cmd::APP_CMD | cmd::RSPNS_48,
                cmd::SEND_SCR,
                cmd::APP_CMD | cmd::RSPNS_48,
                cmd::SET_BUS_WIDTH,
            ]
        );

        let args = bus.writes_to(ARG1);
        assert_eq!(args[1], 0x1AA);
        assert_eq!(args[3], acmd41::ARG_HC);
        assert_eq!(args[6], 0x1234_0000);
        assert_eq!(*args.last().unwrap(), 0x1234_0002);
        assert_eq!(bus.writes_to(BLKSIZECNT), [(1 << 16) | 8]);
    }

    #[test]
    fn byte_addressed_card_from_init() {
        let bus = FakeBus::new();
        ready_card(&bus, false);
        let sim = SimDelay::new();
        let emmc = emmc(&bus, &sim, Timeouts::default());

        assert_eq!(unsafe { emmc.init() }, Ok(()));
        assert!(!emmc.is_block_addressed());
    }

    #[test]
    fn multi_block_read_with_block_count() {
        let bus = FakeBus::new();
        ready_card(&bus, true);
        let sim = SimDelay::new();
        let mut emmc = ready_driver(&bus, &sim, true, true);

        let mut buf = std::vec![0u8; 2 * SECTOR_SIZE];
        assert_eq!(emmc.read_blocks(2048, 2, &mut buf), Ok(()));

        assert_eq!(bus.writes_to(CMDTM), [cmd::SET_BLOCKCNT, cmd::READ_MULTI]);
        assert_eq!(bus.writes_to(ARG1), [2, 2048]);
        assert_eq!(bus.writes_to(BLKSIZECNT), [(2 << 16) | 512]);

        let words: Vec<u32> = buf
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect();
        assert_eq!(words.len(), 256);
        assert_eq!(words[0], 0);
        assert_eq!(words[255], 255);
    }

    #[test]
    fn multi_block_read_without_block_count_stops_transmission() {
        let bus = FakeBus::new();
        ready_card(&bus, true);
        let sim = SimDelay::new();
        let mut emmc = ready_driver(&bus, &sim, true, false);

        let mut buf = std::vec![0u8; 3 * SECTOR_SIZE];
        assert_eq!(emmc.read_blocks(7, 3, &mut buf), Ok(()));

        assert_eq!(bus.writes_to(CMDTM), [cmd::READ_MULTI, cmd::STOP_TRANS]);
    }

    #[test]
    fn byte_addressed_card_reads_one_block_per_command() {
        let bus = FakeBus::new();
        ready_card(&bus, false);
        let sim = SimDelay::new();
        let mut emmc = ready_driver(&bus, &sim, false, true);

        let mut buf = std::vec![0u8; 2 * SECTOR_SIZE];
        assert_eq!(emmc.read_blocks(100, 2, &mut buf), Ok(()));

        assert_eq!(bus.writes_to(CMDTM), [cmd::READ_SINGLE, cmd::READ_SINGLE]);
        assert_eq!(bus.writes_to(ARG1), [100 * 512, 101 * 512]);
        assert_eq!(bus.writes_to(BLKSIZECNT), [(1 << 16) | 512]);
    }

    #[test]
    fn short_destination_is_rejected() {
        let bus = FakeBus::new();
        let sim = SimDelay::new();
        let mut emmc = ready_driver(&bus, &sim, true, true);

        let mut buf = [0u8; SECTOR_SIZE];
        assert_eq!(emmc.read_blocks(0, 2, &mut buf), Err(EmmcError::DataError));
        assert!(bus.writes().is_empty());
    }
}
