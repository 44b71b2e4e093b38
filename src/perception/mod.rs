pub mod change_detector;
pub mod fingerprint;
pub mod stability;
pub mod structural;
pub mod types;
