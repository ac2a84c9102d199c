//! On-disk form of the editable image: a greyscale PNG plus a JSON sidecar.

pub mod greyscale;
pub mod sidecar;

pub use greyscale::{read_png, write_png};
pub use sidecar::{ImageSidecar, SIDECAR_VERSION};
