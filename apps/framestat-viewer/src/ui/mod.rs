mod dashboard;

pub use dashboard::{Dashboard, Source};
