//! Native audio helpers for MindFlow.
//!
//! Everything that touches the host's audio hardware or raw PCM lives here so
//! the core crate only ever deals with finished utterances and encoded clips.

pub mod audio;
pub mod capture;
pub mod device;
