#![deny(unused_variables)]
#![deny(dead_code)]

pub mod files;
pub mod progress;

pub mod shared {
    pub use super::files;
    pub use super::progress;
}

#[path = "../recover/mod.rs"]
pub mod recover;

#[path = "../panel/mod.rs"]
pub mod panel;

#[path = "../factor/mod.rs"]
pub mod factor;

#[path = "../pipeline/mod.rs"]
pub mod pipeline;
