pub mod loader;
pub mod wav;

pub use loader::{load_audio, resample};
pub use wav::write_wav;
