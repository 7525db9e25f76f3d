//! Top-level scheduler tying the CPU to the bus and exposing frame/audio output.

use crate::bus::Bus;
use crate::cartridge::Cartridge;
use crate::cpu::Cpu;
use crate::error::EmulatorResult;
use crate::joypad::ButtonState;
use log::info;

/// Total T-cycles in one 59.7 Hz frame (154 scanlines * 456 dots).
pub const CYCLES_PER_FRAME: u32 = 70224;

/// Owns the CPU and bus and drives the fetch/execute/tick loop.
pub struct Emulator {
    pub cpu: Cpu,
    pub bus: Bus,
}

impl Emulator {
    pub fn new(rom: &[u8]) -> EmulatorResult<Self> {
        let cartridge = Cartridge::load(rom)?;
        info!("cartridge loaded: {} bytes", rom.len());
        Ok(Emulator {
            cpu: Cpu::new(),
            bus: Bus::new(cartridge),
        })
    }

    /// Runs a single CPU step (instruction or interrupt dispatch) plus the
    /// corresponding peripheral ticks, and returns the T-cycles consumed.
    pub fn step(&mut self) -> u16 {
        let cycles = self.cpu.step(&mut self.bus);
        self.bus.tick_peripherals(cycles);
        cycles
    }

    /// Runs steps until a full frame's worth of cycles has elapsed, returning
    /// true once the PPU has a new frame ready in its frame buffer.
    pub fn run_frame(&mut self) -> bool {
        let mut elapsed: u32 = 0;
        let mut frame_ready = false;
        while elapsed < CYCLES_PER_FRAME {
            elapsed += self.step() as u32;
            if self.bus.ppu.render_flag_and_reset() {
                frame_ready = true;
            }
        }
        frame_ready
    }

    pub fn frame_buffer(&self) -> &[u32] {
        self.bus.ppu.frame_buffer()
    }

    pub fn set_button_state(&mut self, state: ButtonState) {
        if self.bus.io.joypad.set_state(state) {
            self.bus
                .io
                .request_interrupt(crate::memory_map::JOYPAD_INTERRUPT_BIT);
        }
    }

    /// Drains and returns any audio samples the APU produced since the last call.
    pub fn take_audio_samples(&mut self) -> Vec<(i16, i16)> {
        std::mem::take(&mut self.bus.apu.samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_rom() -> Vec<u8> {
        vec![0u8; 0x8000]
    }

    #[test]
    fn new_emulator_starts_at_power_up_pc() {
        let emulator = Emulator::new(&blank_rom()).unwrap();
        assert_eq!(emulator.cpu.pc, 0x0100);
        assert_eq!(emulator.cpu.sp, 0xFFFE);
    }

    #[test]
    fn run_frame_advances_at_least_one_full_frame_of_cycles() {
        let mut emulator = Emulator::new(&blank_rom()).unwrap();
        // An all-zero ROM is an endless stream of NOPs (0x00), which is fine:
        // we only care that the scheduler ticks a full frame's worth of cycles.
        let ready = emulator.run_frame();
        assert!(ready);
    }

    #[test]
    fn rejects_unsupported_cartridge_type() {
        let mut rom = blank_rom();
        rom[0x147] = 0x13;
        assert!(Emulator::new(&rom).is_err());
    }
}
