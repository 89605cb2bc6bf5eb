//! Coordinate math, source raster representations, and the on-disk tile format
//! shared by the pyramid build engine.

pub mod constants;
pub use constants::*;

pub mod persistence;
pub use persistence::*;

pub mod projection;
pub use projection::*;

pub mod raster;
pub use raster::*;

pub mod tile;
pub use tile::*;
