//! Slide access and the current-slide session.
//!
//! ```text
//! upload / load ──► open_local_slide ──► TiffSlide ──► SlideSession::install
//!                                                         │
//! tile / overlay / job requests ◄── SlideSession::current ┘
//! ```

mod reader;
mod session;

pub use reader::{open_local_slide, Slide, TiffSlide};
pub use session::{LoadedSlide, SlideSession};
