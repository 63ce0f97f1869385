// Purpose - input surfaces, format conversions

pub mod converter;
pub mod keyboard;
pub mod midi;
