/// COM1 base port, where all kernel diagnostics end up.
pub const COM1: u16 = 0x3F8;
