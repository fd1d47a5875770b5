pub mod compensator;
pub mod discharge;
