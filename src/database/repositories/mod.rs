pub mod exam;
pub mod image;
pub mod rating;

pub use exam::ExamRepository;
pub use image::ImageRepository;
pub use rating::RatingRepository;
