pub mod integration;
pub mod resource;
