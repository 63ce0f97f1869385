// Purpose: per-note orchestration and the shared signal stages
// This layer drives the audio backend; it never renders samples itself

pub mod filter;
pub mod message;
pub mod modulation;
pub mod panner;
pub mod poly;
pub mod voice;
