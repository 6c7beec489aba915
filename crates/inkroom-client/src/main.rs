//! `inkroom`: headless room client.
//!
//! Joins a room, replays its history, optionally draws a shape, then writes
//! the board to a PNG and/or sends a region to the analysis service.

#[cfg(not(target_arch = "wasm32"))]
mod cli;

#[cfg(not(target_arch = "wasm32"))]
fn main() -> std::process::ExitCode {
    cli::run()
}

#[cfg(target_arch = "wasm32")]
fn main() {}
