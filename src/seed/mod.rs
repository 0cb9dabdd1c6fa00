//! Centroid seeding strategies
//!
//! Three interchangeable seeders produce the initial centroid set:
//! uniform random sampling, k-means++ weighted seeding, and canopy-based
//! seeding. The canopy seeder additionally stamps every working point
//! with its candidate-centroid set.

pub(crate) mod canopy;
pub(crate) mod kmeanspp;
pub(crate) mod random;
