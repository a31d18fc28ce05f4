pub mod align;

pub use align::SlideAligner;
