#![forbid(unsafe_code)]

pub mod curriculum;
pub mod error;
pub mod model;
pub mod policy;
pub mod time;

pub use curriculum::{Curriculum, SectionLayout};
pub use error::PolicyError;
pub use time::Clock;
