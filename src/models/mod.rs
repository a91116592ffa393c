pub mod face_swap;
pub mod job;
