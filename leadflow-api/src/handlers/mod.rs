pub mod claim;
pub mod people;
pub mod rules;
