//! Shared runtime kernels for the operational pulse simulator.
//!
//! Everything in this crate is plain data and arithmetic: coordinate
//! translation, planar geometry, supply packages, qualitative probability
//! arguments and the driver command grammar. None of it depends on the Bevy
//! runtime in `core_sim`.

pub mod command_text;
pub mod commands;
pub mod geo;
pub mod geometry;
pub mod supply;
pub mod toem;

pub use command_text::{parse_command_line, parse_duration, CommandParseError};
pub use commands::{DriverCommand, ReportRequest};
pub use geo::{GeoError, GeoTranslator, LatLon, Utm};
pub use geometry::{rubberband, BoundingBox, Circle, Point, Polygon, Segment, Triangle};
pub use supply::{SupplyClass, SupplyPackage};
pub use toem::{Argument, Likelihood, Resolution};
