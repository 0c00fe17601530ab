pub mod error;
pub mod types;
pub mod bits;
pub mod bch;
pub mod idset;
pub mod family;
pub mod render;
pub mod registry;
pub mod plugins;
pub mod detect;
