#[allow(clippy::needless_range_loop)]
pub mod image;
pub mod threshold;
pub mod contour;
pub mod polygon;
#[allow(clippy::needless_range_loop)]
pub mod linalg;
#[allow(clippy::needless_range_loop)]
pub mod homography;
pub mod region;
pub mod dedup;
#[allow(clippy::needless_range_loop)]
pub mod pose;
pub mod detector;
