//! Clip assembly: pre-roll snapshot plus live post-roll, streamed to a sink.

mod assembler;
mod naming;
mod result;
mod task;

pub use assembler::{AssemblerSettings, ClipAssembler, ClipAssemblerStats};
pub use naming::{clip_file_stem, resolve_timezone};
pub use result::{ClipResult, PostRollOutcome};
pub use task::{ClipState, ClipTask};
