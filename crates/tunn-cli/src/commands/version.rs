//! Version command implementation

/// Print the version line
pub fn version_command() {
    println!("tunn {}", tunn_core::version());
}
