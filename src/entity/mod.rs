pub mod survey_images;
pub mod survey_measurements;
pub mod surveys;
pub mod ways;
