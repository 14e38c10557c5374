//! IO modules: downloading, archive extraction, and the post-process
//! pipeline.

pub mod download;
pub mod extract;
pub mod postprocess;
