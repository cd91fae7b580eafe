pub mod diagnostics;
pub mod frame;
pub mod package;
pub mod ppm;
pub mod process;
