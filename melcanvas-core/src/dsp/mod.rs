pub mod griffin_lim;
pub mod mel;
pub mod stft;
