pub mod editor;
pub mod processor;
pub mod queue;
pub mod storage;
pub mod validation;
pub mod worker;
