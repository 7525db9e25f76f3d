use thiserror::Error;

/// Errors surfaced by the core. Both variants abort cartridge loading; there is
/// no error variant for the eleven undefined opcodes the CPU can fetch, since that
/// condition never propagates as a `Result` — `Cpu::step` logs it and treats it as
/// a 4-cycle NOP inline, as one bad fetch should not crash an otherwise-running frame.
#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("cartridge image too short: {0} bytes, expected at least 16384")]
    CartridgeFileTooShort(usize),

    #[error("unsupported cartridge type 0x{0:02X}, only 0x00 (ROM) and 0x01 (MBC1) are supported")]
    UnsupportedCartridge(u8),
}

pub type EmulatorResult<T> = Result<T, EmulatorError>;
