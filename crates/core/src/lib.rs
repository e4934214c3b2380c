//! Domain layer for the badge service.
//!
//! Everything here is storage-agnostic: entity types, slug derivation, the
//! award and creation rules, the prerequisite graph, image scaling and upload
//! path generation.
pub mod imaging;
pub mod policy;
pub mod prerequisites;
pub mod slug;
pub mod tags;
pub mod types;
pub mod upload;
